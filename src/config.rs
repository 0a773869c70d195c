//! World configuration.
//!
//! A [`Config`] names this process's rank, the world size, where rank 0 accepts
//! the bootstrap connections, and how collectives check each other's arguments.
//! [`Config::from_env`] fills it from the [`launch`](crate::launch) variables.

use crate::error::{Error, Result};
use crate::launch;
use std::time::Duration;

/// Default bootstrap timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for creating a communicator.
///
/// # Example
///
/// ```
/// use ferrocoll::Config;
/// use std::time::Duration;
///
/// let config = Config::new(0, 4, "127.0.0.1:29500")
///     .with_verify(false)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(config.size(), 4);
/// assert!(!config.verify());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    rank: i32,
    size: i32,
    addr: String,
    connect_timeout: Duration,
    verify: bool,
}

impl Config {
    /// Create a configuration with default timeout and verification on.
    pub fn new(rank: i32, size: i32, addr: impl Into<String>) -> Self {
        Config {
            rank,
            size,
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            verify: true,
        }
    }

    /// Read the configuration from the launch environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] when rank, size or the rendezvous address is
    /// missing, or when the values are inconsistent.
    pub fn from_env() -> Result<Self> {
        let rank = launch::rank().ok_or_else(|| {
            Error::Launch(format!(
                "{} is not set; start the program with ferrorun",
                launch::RANK_VAR
            ))
        })?;
        let size = launch::size().ok_or_else(|| {
            Error::Launch(format!(
                "{} is not set; start the program with ferrorun",
                launch::SIZE_VAR
            ))
        })?;
        let addr = launch::addr()
            .ok_or_else(|| Error::Launch(format!("{} is not set", launch::ADDR_VAR)))?;

        let mut config = Config::new(rank, size, addr);
        if let Some(ms) = launch::connect_timeout_ms() {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(verify) = launch::verify() {
            config.verify = verify;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that rank and size describe a non-empty world containing this rank.
    pub fn validate(&self) -> Result<()> {
        if self.size < 1 {
            return Err(Error::Launch(format!(
                "world size must be at least 1, got {}",
                self.size
            )));
        }
        if !(0..self.size).contains(&self.rank) {
            return Err(Error::Launch(format!(
                "rank {} is outside a world of size {}",
                self.rank, self.size
            )));
        }
        Ok(())
    }

    /// Set the bootstrap connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable cross-rank argument verification.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Rank of this process.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of processes in the world.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Rank-0 rendezvous address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Bootstrap timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whether collectives exchange descriptors before moving data.
    pub fn verify(&self) -> bool {
        self.verify
    }
}
