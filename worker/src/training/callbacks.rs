use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use machine_learning::{arch::Classifier, persistence};

use super::{EpochLogs, Plateau, warmup_multiplier};
use crate::{Result, WorkerErr};

/// What the training loop exposes to its callbacks.
pub struct TrainState<'a> {
    pub classifier: &'a Classifier,
    /// The rate the next optimizer update will use, callbacks may change it.
    pub learning_rate: f32,
    pub steps_per_epoch: usize,
}

/// Lifecycle hooks of the training loop, called in registration order.
///
/// Epochs and steps are counted from 0. By the time `on_epoch_end` runs, `logs` already hold
/// the values averaged across the group.
pub trait Callback: Send {
    fn on_train_begin(&mut self, _state: &mut TrainState<'_>) -> Result<()> {
        Ok(())
    }

    fn on_batch_begin(
        &mut self,
        _epoch: usize,
        _step: usize,
        _state: &mut TrainState<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        _logs: &EpochLogs,
        _state: &mut TrainState<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self, _state: &mut TrainState<'_>) -> Result<()> {
        Ok(())
    }
}

/// Linear learning rate warm-up from `base_lr` to `base_lr * world_size`.
#[derive(Debug, Clone)]
pub struct Warmup {
    base_lr: f32,
    world_size: usize,
    epochs: usize,
    verbose: bool,
}

impl Warmup {
    pub fn new(base_lr: f32, world_size: usize, epochs: usize, verbose: bool) -> Self {
        Self {
            base_lr,
            world_size,
            epochs,
            verbose,
        }
    }

    fn lr_at(&self, epoch: f32) -> f32 {
        self.base_lr * warmup_multiplier(epoch, self.world_size, self.epochs)
    }
}

impl Callback for Warmup {
    fn on_batch_begin(&mut self, epoch: usize, step: usize, state: &mut TrainState<'_>) -> Result<()> {
        if epoch >= self.epochs {
            return Ok(());
        }

        let progress = step as f32 / state.steps_per_epoch.max(1) as f32;
        state.learning_rate = self.lr_at(epoch as f32 + progress);
        Ok(())
    }

    fn on_epoch_end(&mut self, epoch: usize, _logs: &EpochLogs, state: &mut TrainState<'_>) -> Result<()> {
        if epoch + 1 != self.epochs {
            return Ok(());
        }

        state.learning_rate = self.lr_at(self.epochs as f32);
        if self.verbose {
            info!(
                "epoch {}: finished gradual learning rate warmup to {}",
                epoch + 1,
                state.learning_rate
            );
        }
        Ok(())
    }
}

/// Lowers the learning rate when `val_loss` stops improving.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    plateau: Plateau,
    verbose: bool,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize, factor: f32, verbose: bool) -> Self {
        Self {
            plateau: Plateau::new(patience, factor),
            verbose,
        }
    }
}

impl Callback for ReduceLrOnPlateau {
    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs, state: &mut TrainState<'_>) -> Result<()> {
        if let Some(lr) = self.plateau.observe(logs.val_loss, state.learning_rate) {
            if self.verbose {
                info!(epoch = epoch + 1, lr; "reducing learning rate, val_loss stopped improving");
            }
            state.learning_rate = lr;
        }
        Ok(())
    }
}

/// Saves the model at the end of every epoch as `checkpoint-{epoch}.safetensors`.
///
/// Only the coordinator registers it: it is the single writer of the checkpoint directory.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl Checkpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    /// The file of `epoch`, counted from 1.
    pub fn path(dir: &Path, epoch: usize) -> PathBuf {
        dir.join(format!("checkpoint-{epoch}.safetensors"))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Callback for Checkpoint {
    fn on_train_begin(&mut self, _state: &mut TrainState<'_>) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(WorkerErr::file(&self.dir))?;
        Ok(())
    }

    fn on_epoch_end(&mut self, epoch: usize, _logs: &EpochLogs, state: &mut TrainState<'_>) -> Result<()> {
        let path = Self::path(&self.dir, epoch + 1);
        persistence::save_model(&path, state.classifier)?;
        info!(path:? = path; "checkpoint saved");

        self.written.push(path);
        Ok(())
    }
}
