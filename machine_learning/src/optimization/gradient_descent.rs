use super::Optimizer;
use crate::{MlErr, Result};

/// Gradient descent optimization algorithm, with optional momentum.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - The fraction of the previous step carried into the next one, `0` disables it.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.velocity.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient",
                b: "parameters",
                got: grad.len(),
                expected: params.len(),
            });
        }

        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
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
    fn plain_step() {
        let mut optimizer = GradientDescent::new(2, 0.5, 0.);
        let mut params = [1., 1.];
        optimizer.update_params(&[2., -2.], &mut params).unwrap();
        assert_eq!(params, [0., 2.]);
    }

    #[test]
    fn momentum_accumulates() {
        let mut optimizer = GradientDescent::new(1, 1., 0.5);
        let mut params = [0.];
        optimizer.update_params(&[1.], &mut params).unwrap();
        optimizer.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn size_mismatch() {
        let mut optimizer = GradientDescent::new(2, 0.1, 0.);
        assert!(optimizer.update_params(&[1.], &mut [0., 0.]).is_err());
    }
}
