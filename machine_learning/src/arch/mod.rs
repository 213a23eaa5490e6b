pub mod activations;
mod architecture;
mod backbone;
mod classifier;
pub mod layers;
pub mod loss;
mod sequential;

pub use architecture::{Architecture, BlockSpec, InputShape, TensorLayout};
pub use backbone::Backbone;
pub use classifier::{BatchStats, Classifier};
pub use sequential::Sequential;
