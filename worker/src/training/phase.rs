use crate::{Result, WorkerErr};

/// Where a rank is in the training lifecycle.
///
/// Every rank walks the same sequence of phases, each one ending in a collective:
/// `Initialized → WeightsBroadcast → Training { epoch, step }… → MetricsAveraged { epoch } → …
/// → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    WeightsBroadcast,
    Training { epoch: usize, step: usize },
    MetricsAveraged { epoch: usize },
    Completed,
}

impl Phase {
    /// Whether `next` may directly follow `self`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (Initialized, WeightsBroadcast) => true,
            (WeightsBroadcast, Training { epoch: 0, step: 0 }) => true,
            (Training { epoch, step }, Training { epoch: e, step: s }) => e == epoch && s == step + 1,
            (Training { epoch, .. }, MetricsAveraged { epoch: e }) => e == epoch,
            (MetricsAveraged { epoch }, Training { epoch: e, step: 0 }) => e == epoch + 1,
            (MetricsAveraged { .. }, Completed) => true,
            _ => false,
        }
    }
}

/// Keeps the current phase and refuses illegal transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: Phase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            phase: Phase::Initialized,
        }
    }
}

impl PhaseTracker {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`.
    ///
    /// # Returns
    /// An `IllegalTransition` error, leaving the phase untouched, if `next` cannot follow the
    /// current phase.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(WorkerErr::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_is_legal() {
        let mut tracker = PhaseTracker::default();
        tracker.advance(Phase::WeightsBroadcast).unwrap();
        for epoch in 0..2 {
            for step in 0..3 {
                tracker.advance(Phase::Training { epoch, step }).unwrap();
            }
            tracker.advance(Phase::MetricsAveraged { epoch }).unwrap();
        }
        tracker.advance(Phase::Completed).unwrap();
        assert_eq!(tracker.phase(), Phase::Completed);
    }

    #[test]
    fn training_before_broadcast_is_illegal() {
        let mut tracker = PhaseTracker::default();
        let err = tracker.advance(Phase::Training { epoch: 0, step: 0 });
        assert!(matches!(
            err,
            Err(WorkerErr::IllegalTransition {
                from: Phase::Initialized,
                ..
            })
        ));
        assert_eq!(tracker.phase(), Phase::Initialized);
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let from = Phase::Training { epoch: 1, step: 0 };
        assert!(!from.can_advance_to(Phase::Training { epoch: 1, step: 2 }));
        assert!(!from.can_advance_to(Phase::MetricsAveraged { epoch: 0 }));
        assert!(!from.can_advance_to(Phase::Completed));
        assert!(!Phase::MetricsAveraged { epoch: 0 }.can_advance_to(Phase::Training { epoch: 0, step: 0 }));
    }
}
