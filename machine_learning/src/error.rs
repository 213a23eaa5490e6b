use thiserror::Error;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Error)]
pub enum MlErr {
    #[error("There's a size mismatch between {a} and {b}, got {got} and expected {expected}")]
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("invalid shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("the parameter generator was exhausted after {generated} of {expected} parameters")]
    ParamGenExhausted { generated: usize, expected: usize },

    #[error("invalid distribution: {0}")]
    Distribution(String),

    #[error("invalid architecture: {0}")]
    Architecture(String),

    #[error("tensor `{name}` is missing from {path}")]
    MissingTensor { name: String, path: String },

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::Distribution(value.to_string())
    }
}

impl From<rand_distr::uniform::Error> for MlErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::Distribution(value.to_string())
    }
}
