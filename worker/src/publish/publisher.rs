use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use log::info;
use machine_learning::{arch::Classifier, persistence};

use super::{ArtifactKind, ModelRecord, RunRecord, make_artifact, render_chart};
use crate::{Result, RunConfig, WorkerContext, WorkerErr, training::History};

pub const MODEL_FILE: &str = "model.safetensors";
pub const WEIGHTS_FILE: &str = "model-weights.safetensors";
pub const ARCHITECTURE_FILE: &str = "model-architecture.json";
pub const CHART_FILE: &str = "training-summary.html";
pub const RUN_RECORD_FILE: &str = "run.json";

const FRAMEWORK: &str = "machine_learning";

/// Writes the outputs of a finished run.
///
/// Only the coordinator can get one, through `WorkerContext::publisher`.
#[derive(Debug)]
pub struct Publisher<'a> {
    cfg: &'a RunConfig,
}

impl<'a> Publisher<'a> {
    pub(crate) fn new(cfg: &'a RunConfig) -> Self {
        Self { cfg }
    }

    /// Where tracked artifacts go: `artifact_path/model_dir`.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.cfg.artifact_path.join(&self.cfg.model_dir)
    }

    /// Persists the model, weights, architecture and chart, then writes the run record.
    ///
    /// # Returns
    /// The run record, or an error if the history is empty or a file cannot be written.
    pub fn publish(
        &self,
        ctx: &WorkerContext,
        classifier: &Classifier,
        history: &History,
    ) -> Result<RunRecord> {
        let last = history
            .last()
            .ok_or_else(|| WorkerErr::Artifact("no epoch was trained".into()))?;

        let model_dir = &self.cfg.model_dir;
        let artifacts_dir = self.artifacts_dir();
        create_dir(model_dir)?;
        create_dir(&artifacts_dir)?;

        info!(history:? = history; "history");
        info!(artifacts_dir:? = artifacts_dir; "publishing model artifacts");

        let model_path = model_dir.join(MODEL_FILE);
        persistence::save_model(&model_path, classifier)?;
        let tracked_model = artifacts_dir.join(MODEL_FILE);
        if tracked_model != model_path {
            fs::copy(&model_path, &tracked_model).map_err(WorkerErr::file(&tracked_model))?;
        }

        let chart_path = artifacts_dir.join(CHART_FILE);
        fs::write(&chart_path, render_chart(history)).map_err(WorkerErr::file(&chart_path))?;

        let weights_path = artifacts_dir.join(WEIGHTS_FILE);
        persistence::save_weights(&weights_path, classifier)?;

        let architecture_path = artifacts_dir.join(ARCHITECTURE_FILE);
        persistence::save_architecture(&architecture_path, classifier.architecture())?;

        let artifacts = vec![
            make_artifact("model", ArtifactKind::Model, tracked_model)?,
            make_artifact("training-summary", ArtifactKind::Chart, chart_path.clone())?,
            make_artifact("model-weights", ArtifactKind::Weights, weights_path.clone())?,
            make_artifact(
                ARCHITECTURE_FILE,
                ArtifactKind::Architecture,
                architecture_path.clone(),
            )?,
        ];

        let results = BTreeMap::from([
            ("loss".to_string(), last.loss),
            ("accuracy".to_string(), last.accuracy),
        ]);
        info!(loss = last.loss, accuracy = last.accuracy; "results");

        let model = ModelRecord {
            key: "model".into(),
            path: model_path,
            labels: BTreeMap::from([("framework".to_string(), FRAMEWORK.to_string())]),
            metrics: results.clone(),
            extra_data: BTreeMap::from([
                ("training-summary".to_string(), display(&chart_path)),
                (ARCHITECTURE_FILE.to_string(), display(&architecture_path)),
                ("model-weights".to_string(), display(&weights_path)),
                ("categories_map".to_string(), self.cfg.categories_map.clone()),
            ]),
        };

        let record = RunRecord {
            created_at: Utc::now(),
            world_size: ctx.world_size,
            device: ctx.device.to_string(),
            results,
            history: history.clone(),
            artifacts,
            model,
        };

        let record_path = artifacts_dir.join(RUN_RECORD_FILE);
        let json = serde_json::to_vec_pretty(&record)?;
        fs::write(&record_path, json).map_err(WorkerErr::file(&record_path))?;
        info!(path:? = record_path; "run record written");

        Ok(record)
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(WorkerErr::file(dir))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
