use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result};

/// A 3x3, stride 1, zero padded ("same") convolution followed by a ReLU.
///
/// Parameters are laid out as `[kernel (3 x 3 x in x out), bias (out)]`, the channels-last
/// layout of the pretrained backbones this layer loads.
#[derive(Clone, Debug)]
pub struct Conv3x3 {
    in_channels: usize,
    out_channels: usize,
}

impl Conv3x3 {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        9 * self.in_channels * self.out_channels
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.kernel_size() + self.out_channels
    }

    /// Convolves a single `[h, w, in]` image into a `[h, w, out]` feature map.
    ///
    /// The image is unrolled into a `[h * w, 9 * in]` patch matrix so the whole convolution
    /// becomes one matrix product against the kernel.
    pub fn forward(&self, params: &[f32], x: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (h, w, c) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                a: "image channels",
                b: "convolution input",
                got: c,
                expected: self.in_channels,
            });
        }

        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                a: "parameters",
                b: "convolution layer",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (kernel_raw, bias_raw) = params.split_at(self.kernel_size());
        let kernel = ArrayView2::from_shape((9 * c, self.out_channels), kernel_raw)?;
        let bias = ArrayView1::from_shape(self.out_channels, bias_raw)?;

        let patches = im2col(x);
        let mut out = Array2::zeros((h * w, self.out_channels));
        linalg::general_mat_mul(1.0, &patches, &kernel, 0.0, &mut out);
        out += &bias;
        out.mapv_inplace(|v| v.max(0.));

        Ok(out.into_shape_with_order((h, w, self.out_channels))?)
    }
}

/// Unrolls every 3x3 neighbourhood of `x` into a row, ordered `(dy, dx, channel)`.
fn im2col(x: ArrayView3<f32>) -> Array2<f32> {
    let (h, w, c) = x.dim();
    let mut patches = Array2::zeros((h * w, 9 * c));

    for (row, mut patch) in patches.outer_iter_mut().enumerate() {
        let (i, j) = (row / w, row % w);

        for dy in 0..3 {
            let Some(y) = (i + dy).checked_sub(1).filter(|&y| y < h) else {
                continue;
            };

            for dx in 0..3 {
                let Some(x_) = (j + dx).checked_sub(1).filter(|&x_| x_ < w) else {
                    continue;
                };

                let start = (dy * 3 + dx) * c;
                patch
                    .slice_mut(s![start..start + c])
                    .assign(&x.slice(s![y, x_, ..]));
            }
        }
    }

    patches
}
