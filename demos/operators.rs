//! Operator-level example - what a graph executor sees.
//!
//! Fills a tensor with the rank, then runs the broadcast, reduce, all-gather
//! and all-reduce operators and prints the resulting shapes.
//!
//! Run with: ferrorun -n 3 -- ./target/debug/examples/operators

use ferrocoll::{ops, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let comm = ops::create_common_world()?;
    let rank = comm.rank();
    let size = comm.size();

    let mut x = ops::constant_fill(&[10], rank as f32);
    ops::broadcast(&comm, &mut x, 0)?;
    assert!(x.data().iter().all(|&v| v == 0.0));

    let x = ops::constant_fill(&[10], rank as f32);
    if let Some(reduced) = ops::reduce(&comm, &x, 0)? {
        println!("reduce: shape {:?}, value {}", reduced.shape(), reduced.data()[0]);
    }

    let x = ops::constant_fill(&[2, 10], rank as f32);
    let gathered = ops::allgather(&comm, &x)?;
    assert_eq!(gathered.shape(), &[2 * size as usize, 10]);
    if rank == 0 {
        println!("allgather: shape {:?}", gathered.shape());
    }

    let mut x = ops::constant_fill(&[10], rank as f32);
    let reduced = ops::allreduce(&comm, &x)?;
    ops::allreduce_inplace(&comm, &mut x)?;
    assert_eq!(reduced, x);
    if rank == 0 {
        println!("allreduce: value {}", reduced.data()[0]);
    }
    Ok(())
}
