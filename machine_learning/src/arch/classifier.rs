use std::{cell::RefCell, rc::Rc};

use log::debug;
use ndarray::{Array2, ArrayView2, ArrayView4};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Architecture, Backbone, Sequential,
    activations::ActFn,
    layers::Dense,
    loss::{LossFn, binary_accuracy},
};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandParamGen},
    optimization::Optimizer,
};

/// The loss and accuracy of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchStats {
    pub loss: f32,
    pub accuracy: f32,
}

/// A binary image classifier: a frozen backbone followed by a trainable dense head.
///
/// Every parameter lives in a single flat buffer, backbone first, so it can be moved over the
/// wire or broadcast as one slice. Only the head has a gradient.
#[derive(Clone, Debug)]
pub struct Classifier {
    arch: Architecture,
    backbone: Backbone,
    head: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl Classifier {
    /// Builds a classifier with every parameter set to zero.
    ///
    /// # Returns
    /// An error if the architecture is invalid.
    pub fn new(arch: Architecture) -> Result<Self> {
        arch.validate()?;

        let backbone = Backbone::new(&arch);
        let head = Sequential::new([
            Dense::new((arch.feature_len(), arch.hidden_units), Some(ActFn::Relu)),
            Dense::new((arch.hidden_units, 1), Some(ActFn::Sigmoid)),
        ]);

        let params = vec![0.; backbone.size() + head.size()];
        let grad = vec![0.; head.size()];

        Ok(Self {
            arch,
            backbone,
            head,
            params,
            grad,
        })
    }

    /// Draws every parameter from `seed`: He normal convolutions, a He uniform hidden layer, a
    /// Glorot uniform output layer and zero biases.
    pub fn initialize(&mut self, seed: u64) -> Result<()> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::new();

        for conv in self.backbone.convs() {
            let fan_in = 9 * conv.in_channels();
            param_gens.push(Box::new(RandParamGen::kaiming(
                rng.clone(),
                conv.kernel_size(),
                fan_in,
            )?));
            param_gens.push(Box::new(ConstParamGen::new(0., conv.out_channels())));
        }

        let [hidden, output] = self.head.layers() else {
            return Err(MlErr::Architecture("the head must have two layers".into()));
        };

        let (n_in, n_out) = hidden.dim();
        param_gens.push(Box::new(RandParamGen::he_uniform(rng.clone(), n_in * n_out, n_in)?));
        param_gens.push(Box::new(ConstParamGen::new(0., n_out)));

        let (n_in, n_out) = output.dim();
        param_gens.push(Box::new(RandParamGen::xavier_uniform(
            rng,
            n_in * n_out,
            n_in,
            n_out,
        )?));
        param_gens.push(Box::new(ConstParamGen::new(0., n_out)));

        let expected = self.params.len();
        let sample = ChainedParamGen::new(param_gens)
            .sample(expected)
            .unwrap_or_default();

        if sample.len() != expected {
            return Err(MlErr::ParamGenExhausted {
                generated: sample.len(),
                expected,
            });
        }

        self.params = sample;
        debug!(seed, params = expected; "initialized classifier parameters");
        Ok(())
    }

    pub fn architecture(&self) -> &Architecture {
        &self.arch
    }

    /// The whole flat parameter buffer.
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn backbone_params_mut(&mut self) -> &mut [f32] {
        let n = self.backbone.size();
        &mut self.params[..n]
    }

    /// The trainable slice of the parameters.
    pub fn head_params(&self) -> &[f32] {
        &self.params[self.backbone.size()..]
    }

    /// The gradient of the head computed by the last `compute_gradient`.
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    pub fn trainable_size(&self) -> usize {
        self.grad.len()
    }

    /// Sigmoid outputs for a `[n, h, w, c]` batch.
    pub fn predict(&self, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let (backbone_params, head_params) = self.params.split_at(self.backbone.size());
        let features = self.backbone.features(backbone_params, x)?;
        self.head.predict(head_params, features.view())
    }

    /// Runs forward and backward passes over a batch, leaving the gradient of the mean loss in
    /// `grad`. Parameters are left untouched.
    ///
    /// # Arguments
    /// * `x` - A `[n, h, w, c]` batch of images.
    /// * `y` - The `[n, 1]` labels.
    /// * `loss_fn` - The loss to differentiate.
    ///
    /// # Returns
    /// The loss and accuracy of the batch before any update.
    pub fn compute_gradient<L: LossFn>(
        &mut self,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        loss_fn: &L,
    ) -> Result<BatchStats> {
        self.check_labels(x.shape()[0], y)?;

        let (backbone_params, head_params) = self.params.split_at(self.backbone.size());
        let features = self.backbone.features(backbone_params, x)?;
        let y_pred = self.head.forward(head_params, features)?;

        let stats = BatchStats {
            loss: loss_fn.loss(y_pred.view(), y),
            accuracy: binary_accuracy(y_pred.view(), y),
        };

        let d = loss_fn.loss_prime(y_pred.view(), y);
        self.head.backward(head_params, &mut self.grad, d)?;
        Ok(stats)
    }

    /// Scores a batch without recording anything.
    pub fn evaluate<L: LossFn>(
        &self,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        loss_fn: &L,
    ) -> Result<BatchStats> {
        self.check_labels(x.shape()[0], y)?;
        let y_pred = self.predict(x)?;

        Ok(BatchStats {
            loss: loss_fn.loss(y_pred.view(), y),
            accuracy: binary_accuracy(y_pred.view(), y),
        })
    }

    /// Applies the current gradient to the head.
    pub fn apply_gradient<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        let n = self.backbone.size();
        optimizer.update_params(&self.grad, &mut self.params[n..])
    }

    fn check_labels(&self, n: usize, y: ArrayView2<f32>) -> Result<()> {
        if y.dim() != (n, 1) {
            return Err(MlErr::SizeMismatch {
                a: "labels",
                b: "batch",
                got: y.len(),
                expected: n,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array4, array};

    use super::*;
    use crate::{
        arch::{BlockSpec, InputShape, loss::BinaryCrossEntropy},
        optimization::GradientDescent,
    };

    fn tiny() -> Architecture {
        Architecture {
            input: InputShape {
                height: 4,
                width: 4,
                channels: 1,
            },
            blocks: vec![BlockSpec::new(2, 1)],
            hidden_units: 16,
        }
    }

    fn batch() -> (Array4<f32>, Array2<f32>) {
        let x = Array4::from_shape_fn((2, 4, 4, 1), |(n, i, j, _)| {
            if n == 0 { (i + j) as f32 / 6. } else { 1. - (i * j) as f32 / 9. }
        });
        (x, array![[1.], [0.]])
    }

    #[test]
    fn initialization_is_seeded() {
        let mut a = Classifier::new(tiny()).unwrap();
        let mut b = Classifier::new(tiny()).unwrap();
        a.initialize(7).unwrap();
        b.initialize(7).unwrap();

        assert_eq!(a.params(), b.params());
        assert!(a.params().iter().any(|&p| p != 0.));

        b.initialize(8).unwrap();
        assert_ne!(a.params(), b.params());
    }

    #[test]
    fn gradient_steps_lower_the_loss() {
        let mut model = Classifier::new(tiny()).unwrap();
        model.initialize(3).unwrap();
        model.backbone_params_mut().fill(0.1);
        let backbone = model.params()[..model.params().len() - model.trainable_size()].to_vec();

        let (x, y) = batch();
        let bce = BinaryCrossEntropy::new();
        let mut optimizer = GradientDescent::new(model.trainable_size(), 0.1, 0.);

        let before = model.evaluate(x.view(), y.view(), &bce).unwrap();
        for _ in 0..50 {
            model.compute_gradient(x.view(), y.view(), &bce).unwrap();
            model.apply_gradient(&mut optimizer).unwrap();
        }
        let after = model.evaluate(x.view(), y.view(), &bce).unwrap();

        assert!(after.loss < before.loss, "{after:?} vs {before:?}");
        assert_eq!(&model.params()[..backbone.len()], backbone.as_slice());
    }

    #[test]
    fn mismatched_labels_are_an_error() {
        let mut model = Classifier::new(tiny()).unwrap();
        let (x, _) = batch();
        let y = array![[1.]];
        let err = model.compute_gradient(x.view(), y.view(), &BinaryCrossEntropy::new());
        assert!(matches!(err, Err(MlErr::SizeMismatch { .. })));
    }
}
