mod bce;
mod loss_fn;

pub use bce::{BinaryCrossEntropy, binary_accuracy};
pub use loss_fn::LossFn;
