use ndarray::{Array2, ArrayView2};

use super::layers::Dense;
use crate::{MlErr, Result};

/// A sequential stack of dense layers: information flows forward when computing an output and
/// backward when computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Dense>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters in the stack.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Dense::size).sum()
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Makes a forward pass through the network, recording what `backward` needs.
    ///
    /// # Arguments
    /// * `params` - The parameters of the whole stack.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], mut x: Array2<f32>) -> Result<Array2<f32>> {
        self.check_len(params.len())?;
        let mut offset = 0;

        for layer in self.layers.iter_mut() {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x)?;
            offset += size;
        }

        Ok(x)
    }

    /// Makes a forward pass without touching the recorded state.
    pub fn predict(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len(params.len())?;
        let mut offset = 0;
        let mut x = x.to_owned();

        for layer in &self.layers {
            let size = layer.size();
            let z = layer.evaluate(&params[offset..offset + size], x.view())?;
            x = match layer.act_fn() {
                Some(act_fn) => z.mapv(|z| act_fn.f(z)),
                None => z,
            };
            offset += size;
        }

        Ok(x)
    }

    /// Backpropagates `d`, the derivative of the loss with respect to the output of the last
    /// forward pass, writing the gradient of every layer into `grad`.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_len(params.len())?;
        self.check_len(grad.len())?;
        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn check_len(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                a: "parameters",
                b: "sequential",
                got,
                expected,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::activations::ActFn;

    #[test]
    fn predict_matches_forward() {
        let mut seq = Sequential::new([
            Dense::new((2, 3), Some(ActFn::Relu)),
            Dense::new((3, 1), Some(ActFn::Sigmoid)),
        ]);
        let params: Vec<f32> = (0..seq.size()).map(|i| (i as f32 * 0.37).sin()).collect();
        let x = array![[0.5, -1.], [2., 0.25]];

        let recorded = seq.forward(&params, x.clone()).unwrap();
        let pure = seq.predict(&params, x.view()).unwrap();
        assert_eq!(recorded, pure);
    }

    #[test]
    fn backward_fills_the_whole_gradient() {
        let mut seq = Sequential::new([
            Dense::new((2, 2), None),
            Dense::new((2, 1), None),
        ]);
        let params = vec![1.; seq.size()];
        let mut grad = vec![0.; seq.size()];

        let y = seq.forward(&params, array![[1., 1.]]).unwrap();
        seq.backward(&params, &mut grad, Array2::ones(y.dim())).unwrap();

        assert!(grad.iter().all(|&g| g != 0.));
    }
}
