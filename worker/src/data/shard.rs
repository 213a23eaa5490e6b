use std::{num::NonZeroUsize, ops::Range};

use crate::WorkerContext;

/// Splits `total` samples among `world_size` ranks and returns the shard of `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(world_size > 0);
    assert!(rank < world_size);

    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = usize::from(rank < rem);
    let end = start + base + extra;

    start..end
}

/// The slice of every split a rank streams from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: NonZeroUsize,
}

impl ShardSpec {
    pub fn new(rank: usize, world_size: NonZeroUsize) -> Self {
        assert!(rank < world_size.get(), "rank out of range");
        Self { rank, world_size }
    }

    /// The rows of a `total`-row partition this rank streams.
    ///
    /// With more ranks than rows, a rank left without a shard streams the whole partition.
    pub fn range(self, total: usize) -> Range<usize> {
        let range = shard_range(total, self.rank, self.world_size.get());
        if range.is_empty() { 0..total } else { range }
    }
}

impl From<&WorkerContext> for ShardSpec {
    fn from(ctx: &WorkerContext) -> Self {
        let world_size = NonZeroUsize::new(ctx.world_size).unwrap_or(NonZeroUsize::MIN);
        Self::new(ctx.rank, world_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_balanced() {
        // total 10, ranks 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shards_cover_everything_once() {
        let total = 83;
        let mut next = 0;
        for rank in 0..4 {
            let range = shard_range(total, rank, 4);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn ranks_without_a_shard_stream_the_whole_partition() {
        let world_size = NonZeroUsize::new(4).unwrap();
        assert_eq!(ShardSpec::new(0, world_size).range(2), 0..1);
        assert_eq!(ShardSpec::new(1, world_size).range(2), 1..2);
        assert_eq!(ShardSpec::new(2, world_size).range(2), 0..2);
        assert_eq!(ShardSpec::new(3, world_size).range(2), 0..2);
        assert_eq!(ShardSpec::new(3, world_size).range(0), 0..0);
    }

    #[test]
    fn shard_spec_follows_the_context() {
        let ctx = WorkerContext::new(1, 1, 3, 0).unwrap();
        assert_eq!(ShardSpec::from(&ctx).range(10), 4..7);
    }
}
