use std::{fs, path::Path, path::PathBuf};

use machine_learning::arch::{Architecture, BlockSpec, InputShape};
use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

/// The immutable parameters of a training run, built once at startup and passed by reference to
/// every step of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root directory of the image files.
    pub data_path: PathBuf,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    pub checkpoints_dir: PathBuf,
    /// Root under which tracked artifacts and the run record are written.
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,

    #[serde(default = "default_image_side")]
    pub image_width: usize,
    #[serde(default = "default_image_side")]
    pub image_height: usize,
    #[serde(default = "default_image_channels")]
    pub image_channels: usize,

    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// CSV with `filename` and `category` columns.
    pub file_categories: PathBuf,
    /// Pointer to the category-to-id mapping, forwarded untouched into the model record.
    pub categories_map: String,

    /// The base learning rate, scaled by the world size during warm-up.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_warmup_epochs")]
    pub warmup_epochs: usize,
    #[serde(default = "default_plateau_patience")]
    pub plateau_patience: usize,
    #[serde(default = "default_plateau_factor")]
    pub plateau_factor: f32,
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default = "default_hidden_units")]
    pub hidden_units: usize,
    #[serde(default)]
    pub backbone: BackboneConfig,

    /// Overrides the amount of accelerators detected on the host.
    #[serde(default)]
    pub accelerators: Option<usize>,
}

/// The convolutional layout of the frozen backbone and where to load it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    #[serde(default = "BlockSpec::vgg16")]
    pub blocks: Vec<BlockSpec>,
    /// A safetensors file with `block{b}_conv{c}.{kernel,bias}` tensors.
    #[serde(default)]
    pub weights: Option<PathBuf>,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            blocks: BlockSpec::vgg16(),
            weights: None,
        }
    }
}

/// The local optimizer every rank applies the averaged gradient with.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    #[default]
    Adadelta,
    GradientDescent {
        #[serde(default)]
        momentum: f32,
    },
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_image_side() -> usize {
    128
}

fn default_image_channels() -> usize {
    3
}

fn default_epochs() -> usize {
    1
}

fn default_batch_size() -> usize {
    16
}

fn default_random_state() -> u64 {
    1
}

fn default_test_size() -> f64 {
    0.2
}

fn default_learning_rate() -> f32 {
    1.0
}

fn default_warmup_epochs() -> usize {
    5
}

fn default_plateau_patience() -> usize {
    10
}

fn default_plateau_factor() -> f32 {
    0.1
}

fn default_hidden_units() -> usize {
    128
}

impl RunConfig {
    /// Loads and validates the run parameters from a json file.
    ///
    /// # Arguments
    /// * `path` - The parameters file.
    ///
    /// # Returns
    /// The parsed configuration or an error if it can't be read, parsed or is invalid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(WorkerErr::file(path))?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects parameters no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WorkerErr::Config(msg));

        if self.epochs == 0 {
            return invalid("epochs must be positive".into());
        }

        if self.batch_size == 0 {
            return invalid("batch_size must be positive".into());
        }

        if self.image_width == 0 || self.image_height == 0 {
            return invalid(format!(
                "image size {}x{} has an empty side",
                self.image_width, self.image_height
            ));
        }

        if !matches!(self.image_channels, 1 | 3) {
            return invalid(format!(
                "image_channels must be 1 or 3, got {}",
                self.image_channels
            ));
        }

        if !(self.test_size > 0. && self.test_size < 1.) {
            return invalid(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }

        if !(self.plateau_factor > 0. && self.plateau_factor < 1.) {
            return invalid(format!(
                "plateau_factor must be in (0, 1), got {}",
                self.plateau_factor
            ));
        }

        self.architecture().validate()?;
        Ok(())
    }

    /// The network this run trains.
    pub fn architecture(&self) -> Architecture {
        Architecture {
            input: InputShape {
                height: self.image_height,
                width: self.image_width,
                channels: self.image_channels,
            },
            blocks: self.backbone.blocks.clone(),
            hidden_units: self.hidden_units,
        }
    }
}
