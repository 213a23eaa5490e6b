pub mod augment;
pub mod generator;
pub mod shard;
pub mod split;
pub mod table;

pub use augment::{AugmentConfig, Augmenter};
pub use generator::{Batch, BatchGenerator};
pub use shard::{ShardSpec, shard_range};
pub use split::{Split, StepPlan, train_test_split};
pub use table::{ClassIndices, LabelRow, LabelTable};
