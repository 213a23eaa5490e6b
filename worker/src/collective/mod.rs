mod local;
mod tcp;

pub use local::LocalGroup;
pub use tcp::TcpGroup;

use crate::Result;

/// The collective operations every rank of a group takes part in.
///
/// Each operation is a barrier: it only completes once every rank of the group has called it,
/// so all ranks must issue the same operations in the same order.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait LocalCollective {
    /// This process's rank within the group.
    fn rank(&self) -> usize;

    /// The amount of ranks in the group.
    fn world_size(&self) -> usize;

    /// Overwrites `buf` on every rank with the contents of `buf` on `root`.
    ///
    /// # Arguments
    /// * `buf` - The values to send (on `root`) or receive (elsewhere).
    /// * `root` - The rank that owns the values.
    ///
    /// # Returns
    /// An error if the group fails or a rank disagrees on the length of `buf`.
    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Replaces `buf` on every rank with the element-wise mean of all ranks' `buf`.
    ///
    /// The mean is computed once and shipped to everyone, so all ranks end up holding the very
    /// same values.
    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Waits until every rank reaches this point.
    async fn barrier(&mut self) -> Result<()>;
}
