use super::Optimizer;
use crate::{MlErr, Result};

/// Adadelta: per-parameter step sizes from running averages of squared gradients and squared
/// updates.
#[derive(Debug)]
pub struct Adadelta {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
    accum_grad: Box<[f32]>,
    accum_update: Box<[f32]>,
}

impl Adadelta {
    pub const RHO: f32 = 0.95;
    pub const EPSILON: f32 = 1e-7;

    /// Creates a new `Adadelta` optimizer with the usual `rho` and `epsilon`.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The factor applied to every computed update.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self::with_hyperparams(len, learning_rate, Self::RHO, Self::EPSILON)
    }

    pub fn with_hyperparams(len: usize, learning_rate: f32, rho: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            rho,
            epsilon,
            accum_grad: vec![0.; len].into_boxed_slice(),
            accum_update: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adadelta {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.accum_grad.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient",
                b: "parameters",
                got: grad.len(),
                expected: params.len(),
            });
        }

        let Self {
            learning_rate: lr,
            rho,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.accum_grad.iter_mut())
            .zip(self.accum_update.iter_mut())
            .for_each(|(((p, g), ag), au)| {
                *ag = rho * *ag + (1. - rho) * g * g;
                let update = g * (*au + eps).sqrt() / (*ag + eps).sqrt();
                *au = rho * *au + (1. - rho) * update * update;
                *p -= lr * update;
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_is_tiny_and_against_the_gradient() {
        let mut optimizer = Adadelta::new(2, 1.);
        let mut params = [0., 0.];
        optimizer.update_params(&[1., -1.], &mut params).unwrap();

        assert!(params[0] < 0. && params[0] > -0.01);
        assert!(params[1] > 0. && params[1] < 0.01);
    }

    #[test]
    fn zero_gradient_keeps_params() {
        let mut optimizer = Adadelta::new(1, 1.);
        let mut params = [3.];
        optimizer.update_params(&[0.], &mut params).unwrap();
        assert_eq!(params, [3.]);
    }

    #[test]
    fn learning_rate_scales_the_step() {
        let mut slow = Adadelta::new(1, 1.);
        let mut fast = Adadelta::new(1, 1.);
        fast.set_learning_rate(4.);

        let (mut a, mut b) = ([0.], [0.]);
        slow.update_params(&[1.], &mut a).unwrap();
        fast.update_params(&[1.], &mut b).unwrap();
        assert!((b[0] - 4. * a[0]).abs() < 1e-9);
    }
}
