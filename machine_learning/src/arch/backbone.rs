use ndarray::prelude::*;
use rayon::prelude::*;

use super::{
    Architecture,
    layers::{Conv3x3, max_pool_2x2},
};
use crate::{MlErr, Result};

/// The frozen convolutional feature extractor.
#[derive(Clone, Debug)]
pub struct Backbone {
    blocks: Vec<Vec<Conv3x3>>,
    output_len: usize,
}

impl Backbone {
    pub fn new(arch: &Architecture) -> Self {
        let mut in_channels = arch.input.channels;
        let blocks = arch
            .blocks
            .iter()
            .map(|block| {
                (0..block.convs)
                    .map(|_| {
                        let conv = Conv3x3::new(in_channels, block.filters);
                        in_channels = block.filters;
                        conv
                    })
                    .collect()
            })
            .collect();

        Self {
            blocks,
            output_len: arch.feature_len(),
        }
    }

    /// Returns the amount of parameters of the backbone.
    pub fn size(&self) -> usize {
        self.blocks.iter().flatten().map(Conv3x3::size).sum()
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }

    pub fn convs(&self) -> impl Iterator<Item = &Conv3x3> {
        self.blocks.iter().flatten()
    }

    /// Extracts the flattened features of a single `[h, w, c]` image.
    pub fn extract(&self, params: &[f32], image: ArrayView3<f32>) -> Result<Array1<f32>> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                a: "parameters",
                b: "backbone",
                got: params.len(),
                expected: self.size(),
            });
        }

        let mut fmap = image.to_owned();
        let mut offset = 0;

        for block in &self.blocks {
            for conv in block {
                let size = conv.size();
                fmap = conv.forward(&params[offset..offset + size], fmap.view())?;
                offset += size;
            }

            fmap = max_pool_2x2(fmap.view());
        }

        let features = Array1::from_iter(fmap);
        if features.len() != self.output_len {
            return Err(MlErr::SizeMismatch {
                a: "image",
                b: "backbone output",
                got: features.len(),
                expected: self.output_len,
            });
        }

        Ok(features)
    }

    /// Extracts the features of a `[n, h, w, c]` batch, one image per rayon task.
    ///
    /// # Returns
    /// A `[n, output_len]` matrix.
    pub fn features(&self, params: &[f32], x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let n = x.len_of(Axis(0));
        let rows = (0..n)
            .into_par_iter()
            .map(|i| self.extract(params, x.index_axis(Axis(0), i)))
            .collect::<Result<Vec<_>>>()?;

        let mut features = Array2::zeros((n, self.output_len));
        for (mut row, extracted) in features.outer_iter_mut().zip(rows) {
            row.assign(&extracted);
        }

        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{BlockSpec, InputShape};

    fn arch() -> Architecture {
        Architecture {
            input: InputShape {
                height: 4,
                width: 4,
                channels: 1,
            },
            blocks: vec![BlockSpec::new(2, 1)],
            hidden_units: 1,
        }
    }

    #[test]
    fn features_have_one_row_per_image() {
        let arch = arch();
        let backbone = Backbone::new(&arch);
        let params = vec![0.1; backbone.size()];
        let x = Array4::from_elem((3, 4, 4, 1), 1.);

        let features = backbone.features(&params, x.view()).unwrap();
        assert_eq!(features.dim(), (3, arch.feature_len()));
        assert_eq!(features.row(0), features.row(2));
    }

    #[test]
    fn wrong_image_size_is_an_error() {
        let backbone = Backbone::new(&arch());
        let params = vec![0.; backbone.size()];
        let x = Array4::zeros((1, 6, 6, 1));
        assert!(backbone.features(&params, x.view()).is_err());
    }
}
