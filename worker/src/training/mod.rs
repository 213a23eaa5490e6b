mod callbacks;
mod history;
mod loop_;
mod metrics;
mod phase;
mod schedule;

pub use callbacks::{Callback, Checkpoint, ReduceLrOnPlateau, TrainState, Warmup};
pub use history::{EpochLogs, History};
pub use loop_::{Fitted, Trainer};
pub use metrics::{TrainMetrics, average_metrics};
pub use phase::{Phase, PhaseTracker};
pub use schedule::{Plateau, warmup_multiplier};
