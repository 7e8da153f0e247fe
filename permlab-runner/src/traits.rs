//! Collaborator interfaces: estimator, cross-validation splitter, scorer.
//!
//! The driver never looks inside a model. It clones a prototype estimator
//! for every fold, fits the clone on the training rows, and hands it to the
//! scorer together with the held-out rows.

use serde::{Deserialize, Serialize};

use crate::dataset::{FitParams, Features};

/// Boxed error returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A trainable model.
///
/// `Clone` must produce an unfitted copy with the same hyperparameters (or a
/// copy whose next `fit` fully replaces any fitted state): the driver fits a
/// fresh clone for every fold and permutation, possibly on several threads.
pub trait Estimator: Clone + Send + Sync {
    fn fit(&mut self, features: &Features, labels: &[f64], params: &FitParams)
        -> Result<(), BoxError>;
}

/// One train/test partition of row indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Produces the folds for one scoring pass.
///
/// Called once for the true labels and once per permutation (with the
/// permuted labels), so implementations must be restartable.
pub trait CrossValidator: Sync {
    fn split(&self, features: &Features, labels: &[f64], groups: Option<&[i64]>) -> Vec<Fold>;
}

/// Scores a fitted estimator on held-out rows. Higher is better.
pub trait Scorer<E>: Sync {
    fn score(&self, estimator: &E, features: &Features, labels: &[f64]) -> Result<f64, BoxError>;
}

/// Any `Fn(&E, &Features, &[f64]) -> Result<f64, BoxError>` is a scorer.
impl<E, F> Scorer<E> for F
where
    F: Fn(&E, &Features, &[f64]) -> Result<f64, BoxError> + Sync,
{
    fn score(&self, estimator: &E, features: &Features, labels: &[f64]) -> Result<f64, BoxError> {
        self(estimator, features, labels)
    }
}

/// Folds supplied up front, returned unchanged on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedSplit {
    folds: Vec<Fold>,
}

impl PredefinedSplit {
    pub fn new(folds: Vec<Fold>) -> Self {
        Self { folds }
    }
}

impl CrossValidator for PredefinedSplit {
    fn split(&self, _features: &Features, _labels: &[f64], _groups: Option<&[i64]>) -> Vec<Fold> {
        self.folds.clone()
    }
}
