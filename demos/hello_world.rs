//! Hello World example - world creation and a barrier.
//!
//! Run with: ferrorun -n 4 -- ./target/debug/examples/hello_world

use ferrocoll::{Communicator, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let world = Communicator::create()?;

    let rank = world.rank();
    let size = world.size();
    println!("Hello from rank {} of {}", rank, size);

    // Synchronize before exiting
    world.barrier()?;

    if rank == 0 {
        println!("\nAll processes reported in. Test passed!");
    }
    Ok(())
}
