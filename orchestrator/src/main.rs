use std::{env, num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use log::info;
use orchestrator::{LaunchSpec, launch};

/// Runs a distributed training job: spawns `np` worker ranks on this host and waits for all of
/// them, failing the job if any rank fails.
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version)]
struct Args {
    /// Number of ranks to spawn.
    #[arg(long)]
    np: NonZeroUsize,

    /// The run parameters every rank trains with.
    #[arg(long)]
    params: PathBuf,

    /// Address rank 0 listens on.
    #[arg(long, default_value = orchestrator::session::DEFAULT_COORDINATOR)]
    coordinator: String,

    /// The worker binary, by default the `worker` next to this executable.
    #[arg(long)]
    worker_bin: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let worker_bin = match args.worker_bin {
        Some(path) => path,
        None => env::current_exe()?.with_file_name("worker"),
    };

    let spec = LaunchSpec {
        coordinator: args.coordinator,
        ..LaunchSpec::new(args.np, args.params, worker_bin)
    };

    let session = launch(spec)?;
    session.wait()?;
    info!("every rank finished");
    Ok(())
}
