use std::path::Path;

use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array3, ArrayView3};
use rand::Rng;

use crate::{Result, WorkerErr};

/// Per-channel means of the pretraining set, subtracted on the 0..255 scale.
pub const IMAGENET_MEAN: [f32; 3] = [123.68, 116.779, 103.939];

/// The transforms an image goes through before it is batched.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentConfig {
    /// Degrees, sampled in `[-r, r]`.
    pub rotation_range: f32,
    /// Degrees, sampled in `[-s, s]`.
    pub shear_range: f32,
    pub zoom_range: (f32, f32),
    pub horizontal_flip: bool,
    /// Fractions of the width and height.
    pub width_shift_range: f32,
    pub height_shift_range: f32,
    pub rescale: f32,
    pub mean: Option<[f32; 3]>,
}

impl AugmentConfig {
    /// Randomized augmentation for the training stream.
    pub fn training() -> Self {
        Self {
            rotation_range: 15.,
            shear_range: 0.1,
            zoom_range: (0.8, 1.2),
            horizontal_flip: true,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            ..Self::validation()
        }
    }

    /// Normalization only, so validation metrics are stable.
    pub fn validation() -> Self {
        Self {
            rotation_range: 0.,
            shear_range: 0.,
            zoom_range: (1., 1.),
            horizontal_flip: false,
            width_shift_range: 0.,
            height_shift_range: 0.,
            rescale: 1. / 255.,
            mean: Some(IMAGENET_MEAN),
        }
    }

    fn is_random(&self) -> bool {
        self.rotation_range != 0.
            || self.shear_range != 0.
            || self.zoom_range != (1., 1.)
            || self.horizontal_flip
            || self.width_shift_range != 0.
            || self.height_shift_range != 0.
    }
}

/// Row-major 2x3 affine map from output `(row, col)` to input `(row, col)`.
type Affine = [[f32; 3]; 2];

/// Loads images into normalized `[height, width, channels]` arrays.
#[derive(Debug, Clone)]
pub struct Augmenter {
    cfg: AugmentConfig,
    width: usize,
    height: usize,
    channels: usize,
}

impl Augmenter {
    pub fn new(cfg: AugmentConfig, width: usize, height: usize, channels: usize) -> Self {
        Self {
            cfg,
            width,
            height,
            channels,
        }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.cfg
    }

    /// Decodes the image at `path` and runs it through the pipeline.
    pub fn load<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> Result<Array3<f32>> {
        let img = image::open(path).map_err(|source| WorkerErr::Image {
            path: path.to_path_buf(),
            source,
        })?;

        self.process(&img, rng)
    }

    /// Resizes, transforms and normalizes a decoded image.
    pub fn process<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> Result<Array3<f32>> {
        let resized = img.resize_exact(self.width as u32, self.height as u32, FilterType::Nearest);
        let raw = match self.channels {
            1 => resized.to_luma8().into_raw(),
            _ => resized.to_rgb8().into_raw(),
        };

        let shape = (self.height, self.width, self.channels);
        let pixels = Array3::from_shape_vec(shape, raw.into_iter().map(f32::from).collect())
            .map_err(machine_learning::MlErr::from)?;

        let mut out = if self.cfg.is_random() {
            let (affine, flip) = self.random_transform(rng);
            let mut out = apply_affine(pixels.view(), &affine);
            if flip {
                out.invert_axis(ndarray::Axis(1));
            }
            out
        } else {
            pixels
        };

        self.standardize(&mut out);
        Ok(out)
    }

    /// Samples one transform, returning the inverse map and whether to flip.
    fn random_transform<R: Rng + ?Sized>(&self, rng: &mut R) -> (Affine, bool) {
        let cfg = &self.cfg;
        let (h, w) = (self.height as f32, self.width as f32);

        let theta = symmetric(rng, cfg.rotation_range).to_radians();
        let tx = symmetric(rng, cfg.height_shift_range) * h;
        let ty = symmetric(rng, cfg.width_shift_range) * w;
        let shear = symmetric(rng, cfg.shear_range).to_radians();
        let (lo, hi) = cfg.zoom_range;
        let (zx, zy) = if lo == hi {
            (lo, lo)
        } else {
            (rng.random_range(lo..hi), rng.random_range(lo..hi))
        };
        let flip = cfg.horizontal_flip && rng.random::<f32>() < 0.5;

        let rotation = [
            [theta.cos(), -theta.sin(), 0.],
            [theta.sin(), theta.cos(), 0.],
            [0., 0., 1.],
        ];
        let shift = [[1., 0., tx], [0., 1., ty], [0., 0., 1.]];
        let shearing = [[1., -shear.sin(), 0.], [0., shear.cos(), 0.], [0., 0., 1.]];
        let zoom = [[zx, 0., 0.], [0., zy, 0.], [0., 0., 1.]];

        let m = matmul(matmul(matmul(rotation, shift), shearing), zoom);

        // Transform around the image center.
        let (ox, oy) = (h / 2. - 0.5, w / 2. - 0.5);
        let offset = [[1., 0., ox], [0., 1., oy], [0., 0., 1.]];
        let reset = [[1., 0., -ox], [0., 1., -oy], [0., 0., 1.]];
        let m = matmul(matmul(offset, m), reset);

        ([m[0], m[1]], flip)
    }

    /// Mean subtraction then rescale, in place.
    fn standardize(&self, img: &mut Array3<f32>) {
        let channels = self.channels;
        let mean = self.cfg.mean.map(|mean| {
            let gray = mean.iter().sum::<f32>() / 3.;
            move |c: usize| if channels == 3 { mean[c] } else { gray }
        });
        let rescale = self.cfg.rescale;

        for mut pixel in img.lanes_mut(ndarray::Axis(2)) {
            for (c, v) in pixel.iter_mut().enumerate() {
                if let Some(mean) = &mean {
                    *v -= mean(c);
                }
                *v *= rescale;
            }
        }
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range == 0. {
        0.
    } else {
        rng.random_range(-range..range)
    }
}

fn matmul(a: [[f32; 3]; 3], b: [[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Samples every output pixel at its mapped input position, clamped to the edges.
fn apply_affine(src: ArrayView3<f32>, m: &Affine) -> Array3<f32> {
    let (h, w, c) = src.dim();
    let (max_r, max_c) = (h as f32 - 1., w as f32 - 1.);

    let mut out = Array3::zeros((h, w, c));
    for ((r, col, ch), v) in out.indexed_iter_mut() {
        let (fr, fc) = (r as f32, col as f32);
        let sr = (m[0][0] * fr + m[0][1] * fc + m[0][2]).round().clamp(0., max_r);
        let sc = (m[1][0] * fr + m[1][1] * fc + m[1][2]).round().clamp(0., max_c);
        *v = src[[sr as usize, sc as usize, ch]];
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 10) as u8, (y * 10) as u8, 200])
        }))
    }

    #[test]
    fn validation_only_normalizes() {
        let aug = Augmenter::new(AugmentConfig::validation(), 4, 4, 3);
        let out = aug.process(&gradient(4, 4), &mut StdRng::seed_from_u64(0)).unwrap();

        assert_eq!(out.dim(), (4, 4, 3));
        let expected = (30. - IMAGENET_MEAN[0]) / 255.;
        assert!((out[[1, 3, 0]] - expected).abs() < 1e-6);
        let expected = (200. - IMAGENET_MEAN[2]) / 255.;
        assert!((out[[2, 2, 2]] - expected).abs() < 1e-6);
    }

    #[test]
    fn images_are_resized_to_the_target() {
        let aug = Augmenter::new(AugmentConfig::validation(), 8, 6, 1);
        let out = aug.process(&gradient(20, 11), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(out.dim(), (6, 8, 1));
    }

    #[test]
    fn identity_affine_keeps_pixels() {
        let src = Array3::from_shape_fn((3, 4, 2), |(r, c, ch)| (r * 100 + c * 10 + ch) as f32);
        let id = [[1., 0., 0.], [0., 1., 0.]];
        assert_eq!(apply_affine(src.view(), &id), src);
    }

    #[test]
    fn out_of_bounds_samples_replicate_the_edge() {
        let src = Array3::from_shape_fn((2, 3, 1), |(r, c, _)| (r * 10 + c) as f32);
        let shift_right = [[1., 0., 0.], [0., 1., -5.]];
        let out = apply_affine(src.view(), &shift_right);
        assert!(out.iter().zip([0., 0., 0., 10., 10., 10.]).all(|(a, b)| *a == b));
    }

    #[test]
    fn training_transform_is_seeded() {
        let aug = Augmenter::new(AugmentConfig::training(), 16, 16, 3);
        let img = gradient(16, 16);

        let a = aug.process(&img, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = aug.process(&img, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
