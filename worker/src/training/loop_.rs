use std::time::Instant;

use log::info;
use machine_learning::{
    arch::{BatchStats, Classifier, loss::BinaryCrossEntropy},
    optimization::Optimizer,
};
use tokio::task;

use super::{Callback, EpochLogs, History, Phase, PhaseTracker, TrainMetrics, TrainState, average_metrics};
use crate::{
    Result,
    collective::Collective,
    data::{BatchGenerator, StepPlan},
};

/// What a finished run hands back.
#[derive(Debug)]
pub struct Fitted {
    pub classifier: Classifier,
    pub history: History,
    pub metrics: TrainMetrics,
}

/// Drives synchronized training on one rank.
///
/// Every rank runs the very same sequence of collectives: one weight broadcast, one gradient
/// all-reduce per step and one metric all-reduce per epoch.
///
/// Concurrency note:
/// - Decoding and forward/backward passes are CPU-bound and run on Tokio's blocking pool via
///   `spawn_blocking`.
/// - The classifier and generators are moved into the blocking task and back (O(1) moves) to
///   satisfy `'static` without cloning.
pub struct Trainer<'a, C> {
    collective: &'a mut C,
    optimizer: Box<dyn Optimizer + Send>,
    callbacks: Vec<Box<dyn Callback>>,
    plan: StepPlan,
    epochs: usize,
    verbose: bool,
    loss: BinaryCrossEntropy,
    phase: PhaseTracker,
}

impl<'a, C: Collective> Trainer<'a, C> {
    pub fn new(
        collective: &'a mut C,
        optimizer: Box<dyn Optimizer + Send>,
        plan: StepPlan,
        epochs: usize,
        verbose: bool,
    ) -> Self {
        Self {
            collective,
            optimizer,
            callbacks: Vec::new(),
            plan,
            epochs,
            verbose,
            loss: BinaryCrossEntropy::new(),
            phase: PhaseTracker::default(),
        }
    }

    /// Registers a callback, run after the ones already registered.
    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    /// Trains `classifier` for the configured epochs.
    ///
    /// # Returns
    /// The trained classifier, identical on every rank, with its history.
    pub async fn fit(
        mut self,
        mut classifier: Classifier,
        mut train: BatchGenerator,
        mut validation: BatchGenerator,
    ) -> Result<Fitted> {
        let mut metrics = TrainMetrics::default();
        let mut history = History::default();
        let StepPlan {
            steps_per_epoch,
            validation_steps,
        } = self.plan;

        self.collective.broadcast(classifier.params_mut(), 0).await?;
        self.phase.advance(Phase::WeightsBroadcast)?;

        self.dispatch(&classifier, |cb, state| cb.on_train_begin(state))?;

        for epoch in 0..self.epochs {
            let mut epoch_stats = BatchStats::default();

            for step in 0..steps_per_epoch {
                self.phase.advance(Phase::Training { epoch, step })?;
                self.dispatch(&classifier, |cb, state| cb.on_batch_begin(epoch, step, state))?;

                let start = Instant::now();
                let loss = self.loss;
                let (classifier_back, train_back, result) = task::spawn_blocking(move || {
                    let result = train_batch(&mut classifier, &mut train, &loss);
                    (classifier, train, result)
                })
                .await?;
                classifier = classifier_back;
                train = train_back;
                let (stats, samples) = result?;
                metrics.compute_time += start.elapsed();

                let start = Instant::now();
                self.collective.all_reduce_mean(classifier.grad_mut()).await?;
                metrics.reduce_time += start.elapsed();

                classifier.apply_gradient(self.optimizer.as_mut())?;

                epoch_stats.loss += stats.loss;
                epoch_stats.accuracy += stats.accuracy;
                metrics.bump_step();
                metrics.add_samples(samples);

                if self.verbose {
                    info!(
                        epoch = epoch + 1,
                        step = step + 1,
                        loss = stats.loss,
                        accuracy = stats.accuracy;
                        "{}/{steps_per_epoch}", step + 1
                    );
                }
            }

            let start = Instant::now();
            let loss = self.loss;
            let (classifier_back, validation_back, result) = task::spawn_blocking(move || {
                let result = validate(&classifier, &mut validation, &loss, validation_steps);
                (classifier, validation, result)
            })
            .await?;
            classifier = classifier_back;
            validation = validation_back;
            let val_stats = result?;
            metrics.eval_time += start.elapsed();

            let n = steps_per_epoch.max(1) as f32;
            let mut logs = EpochLogs {
                loss: epoch_stats.loss / n,
                accuracy: epoch_stats.accuracy / n,
                val_loss: val_stats.loss,
                val_accuracy: val_stats.accuracy,
            };

            average_metrics(&mut *self.collective, &mut logs).await?;
            self.phase.advance(Phase::MetricsAveraged { epoch })?;
            history.push(logs, self.optimizer.learning_rate());

            if self.verbose {
                info!(
                    epoch = epoch + 1,
                    loss = logs.loss,
                    accuracy = logs.accuracy,
                    val_loss = logs.val_loss,
                    val_accuracy = logs.val_accuracy,
                    lr = self.optimizer.learning_rate();
                    "epoch {}/{} finished", epoch + 1, self.epochs
                );
            }

            self.dispatch(&classifier, |cb, state| cb.on_epoch_end(epoch, &logs, state))?;
        }

        self.phase.advance(Phase::Completed)?;
        self.dispatch(&classifier, |cb, state| cb.on_train_end(state))?;

        Ok(Fitted {
            classifier,
            history,
            metrics,
        })
    }

    /// Runs a hook on every callback and applies the learning rate they settle on.
    fn dispatch<F>(&mut self, classifier: &Classifier, mut hook: F) -> Result<()>
    where
        F: FnMut(&mut dyn Callback, &mut TrainState<'_>) -> Result<()>,
    {
        let mut state = TrainState {
            classifier,
            learning_rate: self.optimizer.learning_rate(),
            steps_per_epoch: self.plan.steps_per_epoch,
        };

        for callback in &mut self.callbacks {
            hook(callback.as_mut(), &mut state)?;
        }

        self.optimizer.set_learning_rate(state.learning_rate);
        Ok(())
    }
}

/// Computes the local gradient of the next training batch.
fn train_batch(
    classifier: &mut Classifier,
    train: &mut BatchGenerator,
    loss: &BinaryCrossEntropy,
) -> Result<(BatchStats, usize)> {
    let batch = train.next_batch()?;
    let stats = classifier.compute_gradient(batch.x.view(), batch.y.view(), loss)?;
    Ok((stats, batch.len()))
}

/// Mean loss and accuracy over `steps` validation batches.
fn validate(
    classifier: &Classifier,
    validation: &mut BatchGenerator,
    loss: &BinaryCrossEntropy,
    steps: usize,
) -> Result<BatchStats> {
    let mut total = BatchStats::default();
    for _ in 0..steps {
        let batch = validation.next_batch()?;
        let stats = classifier.evaluate(batch.x.view(), batch.y.view(), loss)?;
        total.loss += stats.loss;
        total.accuracy += stats.accuracy;
    }

    let n = steps.max(1) as f32;
    Ok(BatchStats {
        loss: total.loss / n,
        accuracy: total.accuracy / n,
    })
}
