use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Result, WorkerErr, training::History};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Weights,
    Architecture,
    Chart,
}

/// A file tracked by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// The registered model and everything needed to reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub key: String,
    pub path: PathBuf,
    pub labels: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f32>,
    pub extra_data: BTreeMap<String, String>,
}

/// Everything a finished run reports, written as `run.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub created_at: DateTime<Utc>,
    pub world_size: usize,
    pub device: String,
    pub results: BTreeMap<String, f32>,
    pub history: History,
    pub artifacts: Vec<Artifact>,
    pub model: ModelRecord,
}

impl RunRecord {
    pub fn artifact(&self, key: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.key == key)
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(WorkerErr::file(path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Registers an existing file as an artifact.
pub fn make_artifact(key: &str, kind: ArtifactKind, path: PathBuf) -> Result<Artifact> {
    if !path.is_file() {
        return Err(WorkerErr::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let sha256 = sha256_file(&path)?;
    Ok(Artifact {
        key: key.to_string(),
        kind,
        path,
        sha256,
        created_at: Utc::now(),
    })
}
