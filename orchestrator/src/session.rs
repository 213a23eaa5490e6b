use std::{io, num::NonZeroUsize, path::PathBuf, process::ExitStatus};

use log::{error, info, warn};
use tokio::{
    process::{Child, Command},
    runtime::Runtime,
    signal,
    sync::watch,
    task::JoinSet,
};

use crate::{OrchestratorErr, Result};

pub const DEFAULT_COORDINATOR: &str = "127.0.0.1:29500";

const RANK_VAR: &str = "RANK";
const LOCAL_RANK_VAR: &str = "LOCAL_RANK";
const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
const COORDINATOR_ADDR_VAR: &str = "COORDINATOR_ADDR";

/// How to start the ranks of a job on this host.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub np: NonZeroUsize,
    /// The run parameters handed to every rank.
    pub params: PathBuf,
    /// Where rank 0 listens and every other rank dials.
    pub coordinator: String,
    pub worker_bin: PathBuf,
    /// Extra environment for every rank.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(np: NonZeroUsize, params: impl Into<PathBuf>, worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            np,
            params: params.into(),
            coordinator: DEFAULT_COORDINATOR.to_string(),
            worker_bin: worker_bin.into(),
            env: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordinator.rsplit_once(':').is_none_or(|(host, port)| {
            host.is_empty() || port.parse::<u16>().is_err()
        }) {
            return Err(OrchestratorErr::InvalidConfig(format!(
                "coordinator address `{}` is not host:port",
                self.coordinator
            )));
        }

        if self.params.as_os_str().is_empty() {
            return Err(OrchestratorErr::InvalidConfig("no run parameters given".into()));
        }

        Ok(())
    }
}

/// The ranks of a running job. Dropping it kills every rank still alive.
pub struct Session {
    runtime: Runtime,
    ranks: Vec<Child>,
}

impl Session {
    /// Spawns the `np` ranks of `spec`.
    ///
    /// # Returns
    /// A new `Session`, or an error if any rank could not be spawned, in which case the ones
    /// already running are killed.
    pub fn new(spec: LaunchSpec) -> Result<Self> {
        spec.validate()?;

        let runtime = Runtime::new()?;
        let ranks = {
            let _guard = runtime.enter();
            (0..spec.np.get())
                .map(|rank| Self::spawn_rank(&spec, rank))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self { runtime, ranks })
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Waits until every rank exits.
    ///
    /// The first rank to fail stops the job: the others are killed, there is no partial
    /// recovery.
    ///
    /// # Returns
    /// An error naming the first failed rank, if any.
    pub fn wait(self) -> Result<()> {
        let Self { runtime, ranks } = self;

        runtime.block_on(async move {
            let (stop_tx, stop_rx) = watch::channel(false);
            let mut set = JoinSet::new();
            for (rank, child) in ranks.into_iter().enumerate() {
                set.spawn(supervise(rank, child, stop_rx.clone()));
            }

            let mut failure = None;
            loop {
                tokio::select! {
                    joined = set.join_next() => {
                        let Some(joined) = joined else { break };
                        let (rank, outcome) = joined.map_err(io::Error::other)?;

                        match outcome {
                            Ok(status) if status.success() => info!(rank; "rank finished"),
                            _ if failure.is_some() => {}
                            outcome => {
                                let err = match outcome {
                                    Ok(status) => OrchestratorErr::RankFailed { rank, status },
                                    Err(e) => e.into(),
                                };
                                error!("{err}, stopping the remaining ranks");
                                failure = Some(err);
                                let _ = stop_tx.send(true);
                            }
                        }
                    }
                    _ = signal::ctrl_c(), if failure.is_none() => {
                        warn!("received SIGINT, stopping every rank");
                        failure = Some(OrchestratorErr::Interrupted);
                        let _ = stop_tx.send(true);
                    }
                }
            }

            failure.map_or(Ok(()), Err)
        })
    }

    fn spawn_rank(spec: &LaunchSpec, rank: usize) -> Result<Child> {
        let mut cmd = Command::new(&spec.worker_bin);
        cmd.arg("--params")
            .arg(&spec.params)
            .env(RANK_VAR, rank.to_string())
            .env(LOCAL_RANK_VAR, rank.to_string())
            .env(WORLD_SIZE_VAR, spec.np.to_string())
            .env(COORDINATOR_ADDR_VAR, &spec.coordinator)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| OrchestratorErr::Spawn {
            rank,
            program: spec.worker_bin.clone(),
            source,
        })?;

        info!(rank, pid:? = child.id(); "rank spawned");
        Ok(child)
    }
}

/// Waits for a rank to exit, killing it first once `stop` is raised.
async fn supervise(
    rank: usize,
    mut child: Child,
    mut stop: watch::Receiver<bool>,
) -> (usize, io::Result<ExitStatus>) {
    // `wait_for` hands out a guard that is not `Send`, it stays inside this future
    let stopped = async move {
        let _ = stop.wait_for(|stop| *stop).await;
    };

    let outcome = tokio::select! {
        status = child.wait() => status,
        () = stopped => match child.kill().await {
            Ok(()) => child.wait().await,
            Err(e) => Err(e),
        },
    };

    (rank, outcome)
}
