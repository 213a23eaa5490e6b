use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

const EPSILON: f32 = 1e-7;

/// Binary cross-entropy over sigmoid outputs, clipped away from 0 and 1.
#[derive(Clone, Copy, Debug)]
pub struct BinaryCrossEntropy {
    epsilon: f32,
}

impl BinaryCrossEntropy {
    /// Returns a new `BinaryCrossEntropy`.
    pub fn new() -> Self {
        Self { epsilon: EPSILON }
    }

    fn clip(&self, p: f32) -> f32 {
        p.clamp(self.epsilon, 1. - self.epsilon)
    }
}

impl Default for BinaryCrossEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl LossFn for BinaryCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        if y_pred.is_empty() {
            return 0.;
        }

        let total = Zip::from(&y_pred).and(&y).fold(0., |acc, &p, &t| {
            let p = self.clip(p);
            acc - (t * p.ln() + (1. - t) * (1. - p).ln())
        });

        total / y_pred.len() as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len().max(1) as f32;

        Zip::from(&y_pred).and(&y).map_collect(|&p, &t| {
            let p = self.clip(p);
            (p - t) / (p * (1. - p) * n)
        })
    }
}

/// Fraction of predictions on the same side of 0.5 as their label.
///
/// # Arguments
/// * `y_pred` - The sigmoid outputs.
/// * `y` - The 0/1 labels.
///
/// # Returns
/// The accuracy in `[0, 1]`, zero for an empty batch.
pub fn binary_accuracy(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
    if y_pred.is_empty() {
        return 0.;
    }

    let hits = Zip::from(&y_pred)
        .and(&y)
        .fold(0usize, |acc, &p, &t| acc + ((p > 0.5) == (t > 0.5)) as usize);

    hits as f32 / y_pred.len() as f32
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn perfect_predictions_have_tiny_loss() {
        let bce = BinaryCrossEntropy::new();
        let y = array![[1.], [0.]];
        let loss = bce.loss(y.view(), y.view());
        assert!(loss < 1e-5, "loss = {loss}");
    }

    #[test]
    fn uncertain_predictions_cost_ln2() {
        let bce = BinaryCrossEntropy::new();
        let y_pred = array![[0.5], [0.5]];
        let y = array![[1.], [0.]];
        let loss = bce.loss(y_pred.view(), y.view());
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn saturated_predictions_stay_finite() {
        let bce = BinaryCrossEntropy::new();
        let y_pred = array![[1.], [0.]];
        let y = array![[0.], [1.]];

        assert!(bce.loss(y_pred.view(), y.view()).is_finite());
        assert!(bce.loss_prime(y_pred.view(), y.view()).iter().all(|d| d.is_finite()));
    }

    #[test]
    fn accuracy_thresholds_at_one_half() {
        let y_pred = array![[0.9], [0.2], [0.6], [0.4]];
        let y = array![[1.], [0.], [0.], [0.]];
        assert_eq!(binary_accuracy(y_pred.view(), y.view()), 0.75);
    }
}
