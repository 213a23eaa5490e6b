pub mod collective;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod job;
pub mod publish;
pub mod training;

pub use config::RunConfig;
pub use context::{Device, RankEnv, WorkerContext};
pub use error::{Result, WorkerErr};
pub use job::{JobOutcome, run_job};
