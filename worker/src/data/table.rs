use std::{collections::BTreeMap, fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

/// A row of the label table. Extra columns of the csv are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRow {
    pub filename: String,
    /// Read as text whatever it looks like, so numeric categories become labels too.
    pub category: String,
}

/// The `(filename, category)` rows of a labeled image dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    rows: Vec<LabelRow>,
}

impl LabelTable {
    pub fn new(rows: Vec<LabelRow>) -> Self {
        Self { rows }
    }

    /// Reads the table from a csv file with a header row.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(WorkerErr::file(path))?;
        Self::from_reader(file)
    }

    /// Reads the table from any csv source with a header row.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(rdr);

        let headers = rdr.headers()?;
        for column in ["filename", "category"] {
            if !headers.iter().any(|h| h == column) {
                return Err(WorkerErr::Dataset(format!(
                    "the label table has no `{column}` column"
                )));
            }
        }

        let rows = rdr.deserialize().collect::<std::result::Result<Vec<LabelRow>, _>>()?;
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    /// A new table holding the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// How many rows each category has, most frequent first.
    pub fn value_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(&row.category).or_default() += 1;
        }

        let mut counts: Vec<_> = counts
            .into_iter()
            .map(|(category, n)| (category.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }

    /// Maps the sorted distinct categories to `0..k`.
    ///
    /// # Returns
    /// An error unless there are exactly two categories, the classifier is binary.
    pub fn class_indices(&self) -> Result<ClassIndices> {
        let indices: BTreeMap<String, usize> = self
            .rows
            .iter()
            .map(|row| row.category.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, category)| (category, i))
            .collect();

        if indices.len() != 2 {
            return Err(WorkerErr::Dataset(format!(
                "binary classification needs exactly 2 categories, found {}: {:?}",
                indices.len(),
                indices.keys().collect::<Vec<_>>()
            )));
        }

        Ok(ClassIndices(indices))
    }
}

/// The index of every category, which is also its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassIndices(BTreeMap<String, usize>);

impl ClassIndices {
    pub fn get(&self, category: &str) -> Option<usize> {
        self.0.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }
}
