//! ferrorun - start N ranks of a program on this host.
//!
//! Each child gets `FERROCOLL_RANK`, `FERROCOLL_SIZE` and `FERROCOLL_ADDR`, so
//! `Communicator::create()` inside the program finds its peers.
//!
//! Usage: ferrorun -n 4 -- ./target/debug/examples/test_collectives

use std::net::TcpListener;
use std::process::{Child, Command, ExitCode, ExitStatus};
use std::thread;
use std::time::Duration;

use clap::Parser;
use ferrocoll::launch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ferrorun")]
#[command(version)]
#[command(about = "Launch a ferrocoll program as N cooperating ranks", long_about = None)]
struct Args {
    /// Number of ranks
    #[arg(short = 'n', long = "np", default_value = "2")]
    np: u32,

    /// Rendezvous address for rank 0 (default: a free loopback port)
    #[arg(long)]
    addr: Option<String>,

    /// Disable cross-rank argument verification
    #[arg(long)]
    no_verify: bool,

    /// Bootstrap timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Program to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn free_loopback_addr() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

fn spawn_ranks(args: &Args, addr: &str) -> std::io::Result<Vec<Child>> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no program"))?;

    let mut children = Vec::with_capacity(args.np as usize);
    for rank in 0..args.np {
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .env(launch::RANK_VAR, rank.to_string())
            .env(launch::SIZE_VAR, args.np.to_string())
            .env(launch::ADDR_VAR, addr)
            .env(launch::CONNECT_TIMEOUT_VAR, args.timeout_ms.to_string());
        if args.no_verify {
            cmd.env(launch::VERIFY_VAR, "0");
        }
        match cmd.spawn() {
            Ok(child) => children.push(child),
            Err(e) => {
                kill_all(&mut children);
                return Err(e);
            }
        }
    }
    Ok(children)
}

fn kill_all(children: &mut [Child]) {
    for child in children.iter_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Wait for every rank. The first rank to fail takes the others down with it,
/// since they would block forever in their next collective.
fn wait_ranks(mut children: Vec<Child>) -> std::io::Result<Option<(usize, ExitStatus)>> {
    let mut running: Vec<(usize, Child)> = children.drain(..).enumerate().collect();
    while !running.is_empty() {
        let mut still_running = Vec::with_capacity(running.len());
        for (rank, mut child) in running {
            match child.try_wait()? {
                Some(status) if !status.success() => {
                    error!(rank, %status, "rank failed; stopping the others");
                    let mut rest: Vec<Child> = still_running.into_iter().map(|(_, c)| c).collect();
                    rest.push(child);
                    kill_all(&mut rest);
                    return Ok(Some((rank, status)));
                }
                Some(_) => info!(rank, "rank finished"),
                None => still_running.push((rank, child)),
            }
        }
        running = still_running;
        thread::sleep(Duration::from_millis(20));
    }
    Ok(None)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferrorun=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.np == 0 {
        error!("-n must be at least 1");
        return ExitCode::from(2);
    }

    let addr = match args.addr.clone().map_or_else(free_loopback_addr, Ok) {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "cannot pick a rendezvous address");
            return ExitCode::from(2);
        }
    };
    info!(np = args.np, %addr, program = %args.command[0], "launching");

    let children = match spawn_ranks(&args, &addr) {
        Ok(children) => children,
        Err(e) => {
            error!(error = %e, "cannot start program");
            return ExitCode::from(127);
        }
    };

    match wait_ranks(children) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some((rank, status))) => {
            warn!(rank, "exiting with the failed rank's status");
            ExitCode::from(status.code().map_or(1, |c| c.clamp(1, 255) as u8))
        }
        Err(e) => {
            error!(error = %e, "lost track of ranks");
            ExitCode::FAILURE
        }
    }
}
