use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::LabelTable;
use crate::{Result, WorkerErr};

/// The training and validation partitions of a label table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: LabelTable,
    pub validation: LabelTable,
}

/// How many batches an epoch trains and validates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
}

/// Partitions `table` with a permutation drawn from `random_state`.
///
/// The first `ceil(test_size * n)` permuted rows are the validation set and the
/// rest are the training set, so every rank derives the same split on its own.
pub fn train_test_split(table: &LabelTable, test_size: f64, random_state: u64) -> Result<Split> {
    if !(test_size > 0. && test_size < 1.) {
        return Err(WorkerErr::Config(format!(
            "test_size must be within (0, 1), got {test_size}"
        )));
    }

    let n = table.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);

    if n_test == 0 || n_train == 0 {
        return Err(WorkerErr::Dataset(format!(
            "splitting {n} rows with test_size {test_size} leaves an empty partition"
        )));
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut StdRng::seed_from_u64(random_state));

    let (test, train) = permutation.split_at(n_test);
    Ok(Split {
        train: table.select(train),
        validation: table.select(test),
    })
}

impl Split {
    /// Whole batches per epoch on each side, remainder rows are never visited.
    ///
    /// # Returns
    /// An error if either side is smaller than one batch.
    pub fn step_plan(&self, batch_size: usize) -> Result<StepPlan> {
        if batch_size == 0 {
            return Err(WorkerErr::Config("batch_size must be positive".into()));
        }

        let plan = StepPlan {
            steps_per_epoch: self.train.len() / batch_size,
            validation_steps: self.validation.len() / batch_size,
        };

        if plan.steps_per_epoch == 0 || plan.validation_steps == 0 {
            return Err(WorkerErr::Dataset(format!(
                "{} training and {} validation rows do not fill a batch of {batch_size}",
                self.train.len(),
                self.validation.len()
            )));
        }

        Ok(plan)
    }
}
