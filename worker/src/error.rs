use std::{io, path::PathBuf};

use thiserror::Error;

use crate::training::Phase;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures. Every one of them is fatal for the rank.
#[derive(Debug, Error)]
pub enum WorkerErr {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid run parameters: {0}")]
    Config(String),

    #[error("invalid rank environment: {0}")]
    Env(String),

    #[error("rank {local_rank} has no accelerator, only {available} are visible")]
    MissingAccelerator { local_rank: usize, available: usize },

    #[error("malformed label table: {0}")]
    Table(#[from] csv::Error),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Ml(#[from] machine_learning::MlErr),

    #[error("illegal training transition from {from:?} to {to:?}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("collective error: {0}")]
    Collective(String),

    #[error("unexpected message: got {got}")]
    UnexpectedMessage { got: &'static str },

    #[error("buffer length mismatch in {op}: got {got}, expected {expected}")]
    LengthMismatch {
        op: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("peer failed: {0}")]
    Peer(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compute task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkerErr {
    /// Wraps an io error with the path that caused it.
    pub fn file(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::File { path, source }
    }
}
