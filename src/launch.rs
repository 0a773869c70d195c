//! Launch environment helpers.
//!
//! These functions read the environment variables set by a process launcher to
//! determine this process's place in the world. They return `None` if no
//! launcher variable is set (e.g., when the program was started by hand).
//!
//! # Environment Variables
//!
//! | Function | Variable | Fallbacks |
//! |----------|----------|-----------|
//! | `rank()` | `FERROCOLL_RANK` | `OMPI_COMM_WORLD_RANK`, `PMI_RANK`, `SLURM_PROCID` |
//! | `size()` | `FERROCOLL_SIZE` | `OMPI_COMM_WORLD_SIZE`, `PMI_SIZE`, `SLURM_NTASKS` |
//! | `addr()` | `FERROCOLL_ADDR` | — |
//! | `connect_timeout_ms()` | `FERROCOLL_CONNECT_TIMEOUT_MS` | — |
//! | `verify()` | `FERROCOLL_VERIFY` | — |

use std::env;

/// Rank variable written by `ferrorun`.
pub const RANK_VAR: &str = "FERROCOLL_RANK";
/// Size variable written by `ferrorun`.
pub const SIZE_VAR: &str = "FERROCOLL_SIZE";
/// Rendezvous address variable written by `ferrorun`.
pub const ADDR_VAR: &str = "FERROCOLL_ADDR";
/// Bootstrap timeout variable, in milliseconds.
pub const CONNECT_TIMEOUT_VAR: &str = "FERROCOLL_CONNECT_TIMEOUT_MS";
/// Shape verification switch.
pub const VERIFY_VAR: &str = "FERROCOLL_VERIFY";

const RANK_FALLBACKS: [&str; 3] = ["OMPI_COMM_WORLD_RANK", "PMI_RANK", "SLURM_PROCID"];
const SIZE_FALLBACKS: [&str; 3] = ["OMPI_COMM_WORLD_SIZE", "PMI_SIZE", "SLURM_NTASKS"];

fn first_parsed(primary: &str, fallbacks: &[&str]) -> Option<i32> {
    std::iter::once(primary)
        .chain(fallbacks.iter().copied())
        .find_map(|name| env::var(name).ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Check if a launcher has provided rank and size.
pub fn is_launched() -> bool {
    rank().is_some() && size().is_some()
}

/// Get the rank of this process.
pub fn rank() -> Option<i32> {
    first_parsed(RANK_VAR, &RANK_FALLBACKS)
}

/// Get the total number of processes.
pub fn size() -> Option<i32> {
    first_parsed(SIZE_VAR, &SIZE_FALLBACKS)
}

/// Get the rank-0 rendezvous address (`host:port`).
pub fn addr() -> Option<String> {
    env::var(ADDR_VAR).ok().filter(|s| !s.is_empty())
}

/// Get the bootstrap connect timeout in milliseconds.
pub fn connect_timeout_ms() -> Option<u64> {
    env::var(CONNECT_TIMEOUT_VAR)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Get the shape verification switch. `0`, `false`, `off` and `no` disable it.
pub fn verify() -> Option<bool> {
    env::var(VERIFY_VAR).ok().map(|s| {
        !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no"
        )
    })
}
