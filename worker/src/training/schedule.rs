/// The learning rate multiplier at fractional epoch `epoch` of a linear warm-up.
///
/// Ramps from `1` at the start of training to `world_size` once `warmup_epochs` have passed,
/// compensating for the larger effective batch of the group.
pub fn warmup_multiplier(epoch: f32, world_size: usize, warmup_epochs: usize) -> f32 {
    let n = world_size as f32;
    if warmup_epochs == 0 {
        return n;
    }

    let w = warmup_epochs as f32;
    1. + (n - 1.) * epoch.clamp(0., w) / w
}

/// Decides when a monitored value stopped improving.
///
/// Lowers the learning rate by `factor` after `patience` epochs without an improvement of at
/// least `min_delta`, never going below `min_lr`.
#[derive(Debug, Clone)]
pub struct Plateau {
    pub patience: usize,
    pub factor: f32,
    pub min_delta: f32,
    pub min_lr: f32,
    best: f32,
    wait: usize,
}

impl Plateau {
    pub const MIN_DELTA: f32 = 1e-4;

    pub fn new(patience: usize, factor: f32) -> Self {
        Self {
            patience,
            factor,
            min_delta: Self::MIN_DELTA,
            min_lr: 0.,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    pub fn best(&self) -> f32 {
        self.best
    }

    /// Records the value of an epoch.
    ///
    /// # Returns
    /// The reduced learning rate if it has to change.
    pub fn observe(&mut self, value: f32, lr: f32) -> Option<f32> {
        if value < self.best - self.min_delta {
            self.best = value;
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.patience || lr <= self.min_lr {
            return None;
        }

        self.wait = 0;
        Some((lr * self.factor).max(self.min_lr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_starts_at_one_and_reaches_world_size() {
        assert_eq!(warmup_multiplier(0., 4, 5), 1.);
        assert!((warmup_multiplier(1., 4, 5) - (1. + 3. * 0.2)).abs() < 1e-6);
        assert_eq!(warmup_multiplier(5., 4, 5), 4.);
        assert_eq!(warmup_multiplier(9., 4, 5), 4.);
    }

    #[test]
    fn warmup_is_linear_within_an_epoch() {
        // epoch 2, step 8 of 16
        assert!((warmup_multiplier(2.5, 3, 5) - 2.).abs() < 1e-6);
    }

    #[test]
    fn single_rank_never_scales() {
        for e in [0., 0.3, 2., 7.] {
            assert_eq!(warmup_multiplier(e, 1, 5), 1.);
        }
    }

    #[test]
    fn plateau_waits_for_patience() {
        let mut plateau = Plateau::new(2, 0.1);
        assert_eq!(plateau.observe(1.0, 1.), None);
        assert_eq!(plateau.observe(0.99995, 1.), None);
        assert_eq!(plateau.observe(1.2, 1.), Some(0.1));
        assert_eq!(plateau.best(), 1.0);
    }

    #[test]
    fn improvements_reset_the_wait() {
        let mut plateau = Plateau::new(2, 0.5);
        plateau.observe(1.0, 1.);
        plateau.observe(1.0, 1.);
        assert_eq!(plateau.observe(0.5, 1.), None);
        assert_eq!(plateau.observe(0.5, 1.), None);
        assert_eq!(plateau.observe(0.5, 1.), Some(0.5));
    }
}
