use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// All errors that can occur in the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorErr {
    /// Invalid launch parameters, caught before spawning anything.
    #[error("invalid launch: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn rank {rank} ({program}): {source}")]
    Spawn {
        rank: usize,
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A rank exited unsuccessfully, taking the whole job down.
    #[error("rank {rank} failed with {status}")]
    RankFailed { rank: usize, status: ExitStatus },

    #[error("interrupted")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorErr>;
