use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use log::{info, warn};
use tokio::signal;

use worker::{RankEnv, RunConfig, WorkerContext, collective::TcpGroup, run_job};

/// One rank of a distributed image classification training job.
///
/// The rank identity is read from `RANK`, `LOCAL_RANK`, `WORLD_SIZE` and `COORDINATOR_ADDR`.
#[derive(Debug, Parser)]
#[command(name = "worker", version)]
struct Args {
    /// The run parameters, a json file.
    #[arg(long, short)]
    params: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = RunConfig::from_path(&args.params)?;
    let env = RankEnv::from_env()?;
    let ctx = WorkerContext::bootstrap(&env, &cfg)?;

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if !ctx.is_coordinator {
        logger.filter_level(ctx.log_level());
    }
    logger.init();

    info!(
        rank = ctx.rank,
        local_rank = ctx.local_rank,
        world_size = ctx.world_size,
        device:% = ctx.device;
        "rank bootstrapped"
    );

    let mut group = TcpGroup::connect(&env).await?;
    info!(world_size = ctx.world_size; "group formed");

    tokio::select! {
        ret = run_job(&cfg, &ctx, &mut group) => {
            let outcome = ret?;
            if let Some(record) = outcome.record {
                info!(results:? = record.results; "run published");
            }
        }
        _ = signal::ctrl_c() => {
            warn!("received SIGINT, leaving the group");
            bail!("interrupted");
        }
    }

    group.shutdown().await?;
    info!("wrapping up, disconnecting...");
    Ok(())
}
