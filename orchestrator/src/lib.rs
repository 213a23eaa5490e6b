pub mod error;
pub mod session;

pub use error::{OrchestratorErr, Result};
pub use session::{LaunchSpec, Session};

/// Spawns every rank of a job and returns the session supervising them.
///
/// # Errors
/// Returns an `OrchestratorErr` if the spec is invalid or any rank cannot be spawned.
pub fn launch(spec: LaunchSpec) -> Result<Session> {
    log::info!(np = spec.np.get(), coordinator = spec.coordinator.as_str(); "launching ranks");
    Session::new(spec)
}
