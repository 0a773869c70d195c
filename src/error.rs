//! Error types for ferrocoll

use thiserror::Error;

/// Result type for collective operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for collective operations
#[derive(Error, Debug)]
pub enum Error {
    /// A process-wide world has already been created
    #[error("a process-wide communicator already exists")]
    AlreadyInitialized,

    /// The launch environment is missing or malformed
    #[error("launch error: {0}")]
    Launch(String),

    /// Invalid rank specified
    #[error("invalid rank {rank} for a group of size {size}")]
    InvalidRank {
        /// The offending rank
        rank: i32,
        /// Size of the group
        size: i32,
    },

    /// Invalid buffer provided
    #[error("Invalid buffer")]
    InvalidBuffer,

    /// Another rank passed buffers that do not fit the collective
    #[error("rank {rank} passed invalid buffers")]
    PeerInvalidBuffer {
        /// First rank that reported bad buffers
        rank: i32,
    },

    /// Invalid count specified
    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    /// Ranks disagree on the collective being issued
    #[error("rank {rank} issued {found}, expected {expected}")]
    Mismatch {
        /// First rank whose descriptor differs from ours
        rank: i32,
        /// What this rank issued
        expected: String,
        /// What the other rank issued
        found: String,
    },

    /// A frame did not have the expected layout
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The link to a peer is closed
    #[error("peer {peer} disconnected")]
    Disconnected {
        /// Rank of the peer
        peer: i32,
    },

    /// Substrate I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check that `rank` names a member of a group of `size` ranks.
    pub fn check_rank(rank: i32, size: i32) -> Result<()> {
        if (0..size).contains(&rank) {
            Ok(())
        } else {
            Err(Error::InvalidRank { rank, size })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rank_bounds() {
        assert!(Error::check_rank(0, 1).is_ok());
        assert!(Error::check_rank(3, 4).is_ok());
        assert!(matches!(
            Error::check_rank(4, 4),
            Err(Error::InvalidRank { rank: 4, size: 4 })
        ));
        assert!(matches!(
            Error::check_rank(-1, 4),
            Err(Error::InvalidRank { rank: -1, .. })
        ));
    }

    #[test]
    fn display_messages() {
        let err = Error::Mismatch {
            rank: 2,
            expected: "allreduce(f64 x 10)".into(),
            found: "allreduce(f64 x 12)".into(),
        };
        assert_eq!(
            err.to_string(),
            "rank 2 issued allreduce(f64 x 12), expected allreduce(f64 x 10)"
        );
        assert_eq!(
            Error::Disconnected { peer: 3 }.to_string(),
            "peer 3 disconnected"
        );
        assert_eq!(
            Error::PeerInvalidBuffer { rank: 1 }.to_string(),
            "rank 1 passed invalid buffers"
        );
    }

    #[test]
    fn io_error_converts() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope"))?
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
