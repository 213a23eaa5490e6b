use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use log::warn;
use ndarray::{Array2, Array4};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;

use super::{Augmenter, ClassIndices, LabelTable};
use crate::{Result, WorkerErr};

/// A batch of images `[n, height, width, channels]` and their labels `[n, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array4<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.y.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Sample {
    path: PathBuf,
    label: f32,
}

/// An endless stream of batches over one shard of a label table.
///
/// Each pass over the shard visits every sample once in a fresh order; the
/// last batch of a pass holds whatever is left.
#[derive(Debug)]
pub struct BatchGenerator {
    samples: Vec<Sample>,
    augmenter: Augmenter,
    batch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl BatchGenerator {
    /// Builds the stream over rows `shard` of `table`, whose images live under `root`.
    ///
    /// Rows whose file does not exist are skipped with a warning.
    pub fn new(
        table: &LabelTable,
        shard: Range<usize>,
        root: &Path,
        classes: &ClassIndices,
        augmenter: Augmenter,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut samples = Vec::with_capacity(shard.len());
        let mut missing = 0;

        for row in &table.rows()[shard] {
            let label = classes.get(&row.category).ok_or_else(|| {
                WorkerErr::Dataset(format!("unknown category `{}`", row.category))
            })?;

            let path = root.join(&row.filename);
            if !path.is_file() {
                missing += 1;
                continue;
            }

            samples.push(Sample {
                path,
                label: label as f32,
            });
        }

        if missing > 0 {
            warn!(missing, root:? = root; "skipping rows without an image file");
        }

        if samples.is_empty() {
            return Err(WorkerErr::Dataset(format!(
                "no images to stream under {}",
                root.display()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<_> = (0..samples.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            samples,
            augmenter,
            batch_size: batch_size.max(1),
            rng,
            order,
            cursor: 0,
        })
    }

    /// Number of samples in a pass.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decodes the next batch, starting a reshuffled pass when the current one is done.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let seeds: Vec<u64> = (self.cursor..end).map(|_| self.rng.random()).collect();
        let picked = &self.order[self.cursor..end];
        self.cursor = end;

        let images = picked
            .par_iter()
            .zip(seeds)
            .map(|(&i, seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                self.augmenter.load(&self.samples[i].path, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        let (h, w, c) = images[0].dim();
        let mut x = Array4::zeros((images.len(), h, w, c));
        for (mut slot, img) in x.outer_iter_mut().zip(&images) {
            slot.assign(img);
        }

        let y = Array2::from_shape_fn((picked.len(), 1), |(k, _)| self.samples[picked[k]].label);

        Ok(Batch { x, y })
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::data::{AugmentConfig, LabelRow};

    fn fixture(n: usize) -> (tempfile::TempDir, LabelTable) {
        let dir = tempfile::tempdir().unwrap();
        let rows = (0..n)
            .map(|i| {
                let filename = format!("img{i}.png");
                let shade = (i * 20) as u8;
                RgbImage::from_pixel(6, 6, Rgb([shade, shade, shade]))
                    .save(dir.path().join(&filename))
                    .unwrap();
                LabelRow {
                    filename,
                    category: ["cat", "dog"][i % 2].into(),
                }
            })
            .collect();
        (dir, LabelTable::new(rows))
    }

    fn generator(dir: &Path, table: &LabelTable, shard: Range<usize>) -> BatchGenerator {
        let classes = table.class_indices().unwrap();
        let aug = Augmenter::new(AugmentConfig::validation(), 4, 4, 3);
        BatchGenerator::new(table, shard, dir, &classes, aug, 3, 7).unwrap()
    }

    #[test]
    fn passes_end_with_a_short_batch_and_repeat() {
        let (dir, table) = fixture(5);
        let mut generator = generator(dir.path(), &table, 0..5);

        let sizes: Vec<_> = (0..4).map(|_| generator.next_batch().unwrap().len()).collect();
        assert_eq!(sizes, [3, 2, 3, 2]);
    }

    #[test]
    fn a_pass_visits_every_label_once() {
        let (dir, table) = fixture(6);
        let mut generator = generator(dir.path(), &table, 0..6);

        let mut labels: Vec<f32> = (0..2)
            .flat_map(|_| generator.next_batch().unwrap().y.into_iter())
            .collect();
        labels.sort_by(f32::total_cmp);
        assert_eq!(labels, [0., 0., 0., 1., 1., 1.]);
    }

    #[test]
    fn batches_have_the_target_shape() {
        let (dir, table) = fixture(4);
        let batch = generator(dir.path(), &table, 1..3).next_batch().unwrap();
        assert_eq!(batch.x.dim(), (2, 4, 4, 3));
        assert_eq!(batch.y.dim(), (2, 1));
    }

    #[test]
    fn missing_files_are_skipped() {
        let (dir, mut table) = fixture(3);
        let mut rows = table.rows().to_vec();
        rows.push(LabelRow {
            filename: "gone.png".into(),
            category: "cat".into(),
        });
        table = LabelTable::new(rows);

        assert_eq!(generator(dir.path(), &table, 0..4).len(), 3);
    }
}
