mod chart;
mod publisher;
mod record;

pub use chart::render_chart;
pub use publisher::Publisher;
pub use record::{Artifact, ArtifactKind, ModelRecord, RunRecord, make_artifact, sha256_file};
