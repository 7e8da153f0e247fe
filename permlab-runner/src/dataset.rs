//! Dense feature matrix and per-fit parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Row-major `f64` feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
}

impl Features {
    /// Build from a flat row-major buffer. Returns `None` when
    /// `data.len() != n_rows * n_cols`.
    pub fn from_row_major(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != n_rows * n_cols {
            return None;
        }
        Some(Self {
            n_rows,
            n_cols,
            data,
        })
    }

    /// Build from rows. Returns `None` if rows have different lengths.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let n_cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != n_cols) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Some(Self {
            n_rows: rows.len(),
            n_cols,
            data,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    /// New matrix holding `indices` in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.n_cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            n_rows: indices.len(),
            n_cols: self.n_cols,
            data,
        }
    }
}

/// Pick `indices` out of a per-sample vector.
pub fn select<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

/// Extra fit arguments.
///
/// Per-sample vectors (e.g. `sample_weight`) are aligned with the dataset
/// rows and are cut down to the training rows of each fold; scalars pass
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub per_sample: BTreeMap<String, Vec<f64>>,
    pub scalars: BTreeMap<String, f64>,
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_per_sample(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.per_sample.insert(name.into(), values);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.per_sample.is_empty() && self.scalars.is_empty()
    }

    /// First per-sample vector whose length differs from `n_samples`.
    pub fn misaligned(&self, n_samples: usize) -> Option<(&str, usize)> {
        self.per_sample
            .iter()
            .find(|(_, v)| v.len() != n_samples)
            .map(|(k, v)| (k.as_str(), v.len()))
    }

    /// Restrict per-sample vectors to the given training rows.
    pub fn restrict(&self, train: &[usize]) -> Self {
        Self {
            per_sample: self
                .per_sample
                .iter()
                .map(|(k, v)| (k.clone(), select(v, train)))
                .collect(),
            scalars: self.scalars.clone(),
        }
    }
}
