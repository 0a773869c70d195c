//! Shared helpers: run a closure on every rank of a local world.

#![allow(dead_code)]

use ferrocoll::Communicator;
use std::thread;

/// Run `f` on every rank of a `size`-rank local world, one thread per rank,
/// and return the results in rank order.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(Communicator) -> R + Send + Sync + Clone + 'static,
{
    run_world(Communicator::local(size).expect("local world"), f)
}

/// Like [`run_ranks`] over an already built world.
pub fn run_world<R, F>(world: Vec<Communicator>, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(Communicator) -> R + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = world
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::Builder::new()
                .name(format!("rank-{}", comm.rank()))
                .spawn(move || f(comm))
                .expect("spawn rank thread")
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}

/// Sum of ranks `0 + 1 + ... + (size - 1)`.
pub fn rank_sum(size: usize) -> usize {
    size * (size - 1) / 2
}
