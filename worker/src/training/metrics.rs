use std::time::Duration;

use super::EpochLogs;
use crate::{Result, collective::Collective};

/// Counters and timings of the training loop.
#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub compute_time: Duration,
    pub reduce_time: Duration,
    pub eval_time: Duration,

    pub steps: u64,
    pub samples: u64,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn add_samples(&mut self, n: usize) {
        self.samples += n as u64;
    }
}

/// Replaces this rank's epoch logs with their mean across the group.
///
/// Every rank ends up reporting the very same values; averaging logs that already agree leaves
/// them unchanged.
pub async fn average_metrics<C: Collective>(collective: &mut C, logs: &mut EpochLogs) -> Result<()> {
    let mut buf = logs.to_array();
    collective.all_reduce_mean(&mut buf).await?;
    *logs = EpochLogs::from_array(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::future::try_join_all;

    use super::*;
    use crate::collective::LocalGroup;

    fn logs(v: f32) -> EpochLogs {
        EpochLogs {
            loss: v,
            accuracy: v / 4.,
            val_loss: 2. * v,
            val_accuracy: 0.5,
        }
    }

    #[tokio::test]
    async fn ranks_report_the_mean() {
        let averaged = try_join_all(LocalGroup::group(2).into_iter().enumerate().map(
            |(rank, mut group)| async move {
                let mut logs = logs(rank as f32 + 1.);
                average_metrics(&mut group, &mut logs).await?;
                Ok::<_, crate::WorkerErr>(logs)
            },
        ))
        .await
        .unwrap();

        assert_eq!(averaged[0], averaged[1]);
        assert_eq!(averaged[0].loss, 1.5);
        assert_eq!(averaged[0].val_loss, 3.);
    }

    #[tokio::test]
    async fn averaging_agreeing_logs_is_idempotent() {
        let averaged = try_join_all(LocalGroup::group(3).into_iter().map(|mut group| async move {
            let mut logs = logs(0.25);
            average_metrics(&mut group, &mut logs).await?;
            average_metrics(&mut group, &mut logs).await?;
            Ok::<_, crate::WorkerErr>(logs)
        }))
        .await
        .unwrap();

        for logs in averaged {
            assert_eq!(logs, self::logs(0.25));
        }
    }
}
