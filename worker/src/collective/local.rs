use std::sync::Arc;

use tokio::sync::{Barrier, Mutex};

use super::Collective;
use crate::{Result, WorkerErr};

struct Shared {
    barrier: Barrier,
    contributions: Mutex<Vec<Vec<f32>>>,
    result: Mutex<Vec<f32>>,
}

/// A group of ranks living in the same process, one `LocalGroup` handle per rank.
///
/// Reductions are finalized by the leader of a `tokio::sync::Barrier`, which sums the
/// contributions in rank order so every run yields the same values.
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates the handles of a group of `world_size` ranks, indexed by rank.
    pub fn group(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            contributions: Mutex::new(vec![Vec::new(); world_size]),
            result: Mutex::new(Vec::new()),
        });

        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                shared: shared.clone(),
            })
            .collect()
    }

    /// A group of one, where every collective is a no-op.
    pub fn solo() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            shared: Arc::new(Shared {
                barrier: Barrier::new(1),
                contributions: Mutex::new(vec![Vec::new()]),
                result: Mutex::new(Vec::new()),
            }),
        }
    }

    fn check_len(op: &'static str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(WorkerErr::LengthMismatch { op, got, expected });
        }

        Ok(())
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(WorkerErr::Collective(format!(
                "broadcast root {root} is outside of a group of {}",
                self.world_size
            )));
        }

        if self.world_size == 1 {
            return Ok(());
        }

        if self.rank == root {
            let mut result = self.shared.result.lock().await;
            result.clear();
            result.extend_from_slice(buf);
        }

        self.shared.barrier.wait().await;

        let mut outcome = Ok(());
        if self.rank != root {
            let result = self.shared.result.lock().await;
            outcome = Self::check_len("broadcast", buf.len(), result.len());
            if outcome.is_ok() {
                buf.copy_from_slice(&result);
            }
        }

        self.shared.barrier.wait().await;
        outcome
    }

    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }

        {
            let mut contributions = self.shared.contributions.lock().await;
            let slot = &mut contributions[self.rank];
            slot.clear();
            slot.extend_from_slice(buf);
        }

        if self.shared.barrier.wait().await.is_leader() {
            let mut contributions = self.shared.contributions.lock().await;
            let mut result = self.shared.result.lock().await;
            let n = self.world_size as f32;

            result.clear();
            result.resize(contributions[0].len(), 0.);

            for contribution in contributions.iter_mut() {
                if contribution.len() == result.len() {
                    result
                        .iter_mut()
                        .zip(contribution.iter())
                        .for_each(|(r, c)| *r += c);
                } else {
                    // a mismatched rank poisons the round, every rank sees it below
                    result.clear();
                    break;
                }

                contribution.clear();
            }

            result.iter_mut().for_each(|r| *r /= n);
        }

        self.shared.barrier.wait().await;

        let result = self.shared.result.lock().await;
        let outcome = Self::check_len("all_reduce_mean", result.len(), buf.len());
        if outcome.is_ok() {
            buf.copy_from_slice(&result);
        }
        drop(result);

        self.shared.barrier.wait().await;
        outcome
    }

    async fn barrier(&mut self) -> Result<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_all<F, Fut>(world_size: usize, f: F) -> Vec<Vec<f32>>
    where
        F: Fn(LocalGroup) -> Fut,
        Fut: Future<Output = Vec<f32>> + Send + 'static,
    {
        let handles: Vec<_> = LocalGroup::group(world_size)
            .into_iter()
            .map(|group| tokio::spawn(f(group)))
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn broadcast_copies_root_values_exactly() {
        let results = run_all(3, |mut group| async move {
            let mut buf = vec![group.rank() as f32 + 0.1; 4];
            group.broadcast(&mut buf, 0).await.unwrap();
            buf
        })
        .await;

        for buf in &results {
            assert_eq!(buf, &vec![0.1_f32; 4]);
        }
    }

    #[tokio::test]
    async fn all_reduce_averages() {
        let results = run_all(4, |mut group| async move {
            let mut buf = vec![group.rank() as f32, 1.];
            group.all_reduce_mean(&mut buf).await.unwrap();
            buf
        })
        .await;

        for buf in &results {
            assert_eq!(buf, &vec![1.5, 1.]);
        }
    }

    #[tokio::test]
    async fn repeated_reductions_do_not_leak() {
        let results = run_all(2, |mut group| async move {
            let mut buf = vec![1.];
            for _ in 0..5 {
                group.all_reduce_mean(&mut buf).await.unwrap();
                buf[0] += group.rank() as f32;
            }
            buf
        })
        .await;

        assert_eq!(results[0], vec![3.]);
        assert_eq!(results[1], vec![4.]);
    }

    #[tokio::test]
    async fn mismatched_lengths_fail_every_rank() {
        let handles: Vec<_> = LocalGroup::group(2)
            .into_iter()
            .map(|mut group| {
                tokio::spawn(async move {
                    let mut buf = vec![0.; 2 + group.rank()];
                    group.all_reduce_mean(&mut buf).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn short_broadcast_buffer_fails_without_blocking_the_group() {
        let handles: Vec<_> = LocalGroup::group(3)
            .into_iter()
            .map(|mut group| {
                tokio::spawn(async move {
                    let len = if group.rank() == 2 { 1 } else { 4 };
                    let mut buf = vec![group.rank() as f32; len];
                    let outcome = group.broadcast(&mut buf, 0).await;
                    group.barrier().await.unwrap();
                    (outcome, buf)
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert!(outcomes[0].0.is_ok());
        assert!(outcomes[1].0.is_ok());
        assert_eq!(outcomes[1].1, vec![0.; 4]);
        assert!(matches!(
            outcomes[2].0,
            Err(WorkerErr::LengthMismatch { op: "broadcast", .. })
        ));
        assert_eq!(outcomes[2].1, vec![2.]);
    }

    #[tokio::test]
    async fn solo_is_a_no_op() {
        let mut group = LocalGroup::solo();
        let mut buf = vec![3.];
        group.broadcast(&mut buf, 0).await.unwrap();
        group.all_reduce_mean(&mut buf).await.unwrap();
        group.barrier().await.unwrap();
        assert_eq!(buf, [3.]);
    }
}
