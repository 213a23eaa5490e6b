use serde::{Deserialize, Serialize};

/// The scalars reported at the end of an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

impl EpochLogs {
    /// The logs as a flat buffer, in a fixed order every rank agrees on.
    pub fn to_array(self) -> [f32; 4] {
        [self.loss, self.accuracy, self.val_loss, self.val_accuracy]
    }

    pub fn from_array([loss, accuracy, val_loss, val_accuracy]: [f32; 4]) -> Self {
        Self {
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        }
    }
}

/// Per-epoch metric sequences of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    pub lr: Vec<f32>,
}

impl History {
    pub fn push(&mut self, logs: EpochLogs, lr: f32) {
        self.loss.push(logs.loss);
        self.accuracy.push(logs.accuracy);
        self.val_loss.push(logs.val_loss);
        self.val_accuracy.push(logs.val_accuracy);
        self.lr.push(lr);
    }

    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn get(&self, epoch: usize) -> Option<EpochLogs> {
        Some(EpochLogs {
            loss: *self.loss.get(epoch)?,
            accuracy: *self.accuracy.get(epoch)?,
            val_loss: *self.val_loss.get(epoch)?,
            val_accuracy: *self.val_accuracy.get(epoch)?,
        })
    }

    pub fn last(&self) -> Option<EpochLogs> {
        self.epochs().checked_sub(1).and_then(|e| self.get(e))
    }

    /// `(epoch, logs)` pairs, epochs counted from 1.
    pub fn rows(&self) -> impl Iterator<Item = (usize, EpochLogs)> + '_ {
        (0..self.epochs()).filter_map(|e| Some((e + 1, self.get(e)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_count_epochs_from_one() {
        let mut history = History::default();
        assert_eq!(history.last(), None);

        let first = EpochLogs {
            loss: 0.7,
            accuracy: 0.5,
            val_loss: 0.69,
            val_accuracy: 0.55,
        };
        let second = EpochLogs { loss: 0.6, ..first };
        history.push(first, 1.);
        history.push(second, 2.);

        let rows: Vec<_> = history.rows().collect();
        assert_eq!(rows, [(1, first), (2, second)]);
        assert_eq!(history.last(), Some(second));
        assert_eq!(history.lr, [1., 2.]);
    }
}
