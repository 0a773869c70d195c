//! # ferrocoll
//!
//! Blocking collective communication over a fixed group of ranks.
//!
//! This crate provides:
//! - A group handle, [`Communicator`], with a stable rank ordering
//! - Broadcast, reduce, all-gather and all-reduce (value-returning and in-place)
//! - Barrier and gather
//! - Two substrates: threads of one process (`Communicator::local`) and one
//!   process per rank over TCP (`Communicator::create`, feature `tcp`)
//! - Shaped-buffer operator contracts for graph executors ([`ops`])
//!
//! ## Supported Types
//!
//! All communication operations are generic over [`CollDatatype`]:
//! `f32`, `f64`, `i32`, `i64`, `u8`, `u32`, `u64`
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrocoll::{Communicator, ReduceOp};
//!
//! fn main() -> Result<(), ferrocoll::Error> {
//!     // Started with: ferrorun -n 4 -- ./my_program
//!     let world = Communicator::create()?;
//!
//!     let rank = world.rank();
//!     let size = world.size();
//!     println!("Hello from rank {} of {}", rank, size);
//!
//!     let mut data = vec![0.0f64; 100];
//!     if rank == 0 {
//!         data.fill(42.0);
//!     }
//!     world.broadcast(&mut data, 0)?;
//!
//!     let sum = world.allreduce_scalar(rank as f64, ReduceOp::Sum)?;
//!     println!("Rank {rank}: sum of all ranks = {sum}");
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Contract
//!
//! Every rank must issue the same collectives in the same order with
//! consistent arguments. With verification on (the default), ranks exchange a
//! short descriptor before each collective and all of them return
//! [`Error::Mismatch`] if the descriptors differ. A peer that stops
//! participating blocks everyone else; there are no timeouts.
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tcp`   | Multi-process TCP substrate | — |
//! | `cli`   | `ferrorun` launcher | `tcp`, `clap`, `tracing-subscriber` |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod comm;
pub mod config;
mod datatype;
mod error;
pub mod launch;
pub mod ops;
#[cfg(feature = "tcp")]
mod tcp;
mod transport;

pub use comm::Communicator;
pub use config::Config;
pub use datatype::{CollDatatype, DatatypeTag};
pub use error::{Error, Result};
pub use ops::Tensor;

#[cfg(feature = "tcp")]
use std::sync::atomic::AtomicBool;

/// Global flag tracking whether this process holds a TCP world
#[cfg(feature = "tcp")]
static WORLD_CREATED: AtomicBool = AtomicBool::new(false);

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Product of values
    Prod = 3,
}

impl ReduceOp {
    /// Decode an operation from its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ReduceOp::Sum,
            1 => ReduceOp::Max,
            2 => ReduceOp::Min,
            3 => ReduceOp::Prod,
            _ => return None,
        })
    }
}
