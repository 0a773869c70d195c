//! Integration test for the blocking collectives over the TCP substrate.
//!
//! Exercises broadcast (every root), reduce (every root), allgather, allreduce
//! and in-place allreduce with rank-valued fills, then checks that a length
//! mismatch is reported on every rank.
//!
//! A custom panic hook calls `std::process::abort()` so that a failing rank
//! takes the launcher down instead of leaving its peers blocked.
//!
//! Run with: ferrorun -n 4 -- ./target/debug/examples/test_collectives

use ferrocoll::{Communicator, Error, ReduceOp};

fn main() {
    let world = Communicator::create().expect("world creation failed");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        std::process::abort();
    }));

    let rank = world.rank();
    let size = world.size();
    let expected_sum = (size * (size - 1) / 2) as f32;

    // ========================================================================
    // Test 1: broadcast from every root
    // ========================================================================
    for root in 0..size {
        let mut data = vec![rank as f32; 10];
        world.broadcast(&mut data, root).expect("broadcast failed");
        assert!(
            data.iter().all(|&x| x == root as f32),
            "rank {rank}: broadcast from {root} gave {data:?}"
        );
    }
    if rank == 0 {
        println!("PASS: broadcast");
    }

    // ========================================================================
    // Test 2: reduce (Sum) to every root
    // ========================================================================
    for root in 0..size {
        let send = vec![rank as f32; 10];
        let mut recv = vec![0.0f32; 10];
        world
            .reduce(&send, &mut recv, ReduceOp::Sum, root)
            .expect("reduce failed");
        if rank == root {
            assert!(
                recv.iter().all(|&x| x == expected_sum),
                "reduce to {root} gave {recv:?}, expected {expected_sum}"
            );
        }
    }
    if rank == 0 {
        println!("PASS: reduce (Sum)");
    }

    // ========================================================================
    // Test 3: allgather
    // ========================================================================
    {
        let send = vec![rank as f32; 20];
        let mut recv = vec![0.0f32; 20 * size as usize];
        world.allgather(&send, &mut recv).expect("allgather failed");
        for (i, &v) in recv.iter().enumerate() {
            assert_eq!(v, (i / 20) as f32, "rank {rank}: allgather recv[{i}]");
        }
        if rank == 0 {
            println!("PASS: allgather");
        }
    }

    // ========================================================================
    // Test 4: allreduce and in-place allreduce
    // ========================================================================
    {
        let send = vec![rank as f32; 10];
        let mut recv = vec![0.0f32; 10];
        world
            .allreduce(&send, &mut recv, ReduceOp::Sum)
            .expect("allreduce failed");
        assert!(recv.iter().all(|&x| x == expected_sum));

        let mut data = send.clone();
        world
            .allreduce_inplace(&mut data, ReduceOp::Sum)
            .expect("in-place allreduce failed");
        assert_eq!(data, recv, "rank {rank}: in-place differs");
        if rank == 0 {
            println!("PASS: allreduce (Sum, in-place)");
        }
    }

    // ========================================================================
    // Test 5: mismatched lengths fail everywhere
    // ========================================================================
    if size > 1 && world.verifies() {
        let mut data = vec![0.0f64; if rank == 0 { 11 } else { 10 }];
        match world.allreduce_inplace(&mut data, ReduceOp::Sum) {
            Err(Error::Mismatch { .. }) => {}
            other => panic!("rank {rank}: expected a mismatch, got {other:?}"),
        }
        world.barrier().expect("barrier after mismatch failed");
        if rank == 0 {
            println!("PASS: mismatch detection");
        }
    }

    if rank == 0 {
        println!("\nAll collective tests passed on {size} ranks");
    }
}
