//! Permutation test driver: true score, permuted scores, empirical p-value.
//!
//! One run does three things:
//! 1. Generates the permutation set (any generation error aborts before
//!    scoring starts).
//! 2. Computes the cross-validated score on the true labels.
//! 3. Recomputes the cross-validated score once per permutation column, with
//!    `labels[source] * sign` in place of the labels.
//!
//! Permutation columns are scored independently, in parallel when the
//! configuration allows it. Every fold fits a fresh clone of the estimator
//! prototype, so no fitted state is shared between folds, permutations, or
//! threads.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use permlab_core::{generate, NullSummary, PermutationError, PermutationSet, PVALUE};

use crate::config::{ConfigError, PermutationTestConfig};
use crate::dataset::{select, FitParams, Features};
use crate::traits::{BoxError, CrossValidator, Estimator, Scorer};

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from a permutation test run.
#[derive(Debug, Error)]
pub enum PermTestError {
    #[error("shape mismatch: {what} has {actual} rows, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("permutation generation failed: {0}")]
    Generation(#[from] PermutationError),
    #[error("cross-validator produced no folds")]
    NoFolds,
    #[error("fold {fold} references row {index}, but the dataset has {n_samples} rows")]
    InvalidFold {
        fold: usize,
        index: usize,
        n_samples: usize,
    },
    #[error("estimator failed on {} fold {fold}: {source}", pass_label(.permutation))]
    EstimatorFailure {
        /// `None` for the true-label pass.
        permutation: Option<usize>,
        fold: usize,
        #[source]
        source: BoxError,
    },
    #[error("failed to build scoring thread pool: {0}")]
    ThreadPool(String),
}

fn pass_label(permutation: &Option<usize>) -> String {
    match permutation {
        Some(p) => format!("permutation {p}"),
        None => "the true labels,".to_string(),
    }
}

/// Everything a run reads from the caller's data.
#[derive(Debug, Clone, Copy)]
pub struct TestData<'a> {
    pub features: &'a Features,
    pub labels: &'a [f64],
    /// Group labels forwarded to the cross-validator.
    pub groups: Option<&'a [i64]>,
    /// Exchangeability blocks for the permutation generator.
    pub blocks: Option<&'a [i64]>,
    pub fit_params: Option<&'a FitParams>,
}

impl<'a> TestData<'a> {
    pub fn new(features: &'a Features, labels: &'a [f64]) -> Self {
        Self {
            features,
            labels,
            groups: None,
            blocks: None,
            fit_params: None,
        }
    }

    pub fn with_groups(mut self, groups: &'a [i64]) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_blocks(mut self, blocks: &'a [i64]) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn with_fit_params(mut self, fit_params: &'a FitParams) -> Self {
        self.fit_params = Some(fit_params);
        self
    }

    pub fn n_samples(&self) -> usize {
        self.features.n_rows()
    }

    /// Check that labels, groups, blocks and per-sample fit params all have
    /// one entry per feature row.
    pub fn validate(&self) -> Result<usize, PermTestError> {
        let n = self.features.n_rows();
        let check = |what: &'static str, actual: usize| {
            if actual == n {
                Ok(())
            } else {
                Err(PermTestError::ShapeMismatch {
                    what,
                    expected: n,
                    actual,
                })
            }
        };

        check("labels", self.labels.len())?;
        if let Some(groups) = self.groups {
            check("groups", groups.len())?;
        }
        if let Some(blocks) = self.blocks {
            check("exchangeability blocks", blocks.len())?;
        }
        if let Some((_, len)) = self.fit_params.and_then(|p| p.misaligned(n)) {
            check("per-sample fit parameter", len)?;
        }
        Ok(n)
    }
}

/// Outcome of a permutation test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationTestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Cross-validated score on the true labels.
    pub true_score: f64,
    /// One score per permutation column, in column order.
    pub permutation_scores: Vec<f64>,
    /// Always contains `pvalue`.
    pub metrics: BTreeMap<String, f64>,
    /// BLAKE3 fingerprint of the permutation set that was scored.
    pub permutation_fingerprint: String,
    pub config: PermutationTestConfig,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl PermutationTestResult {
    pub fn pvalue(&self) -> f64 {
        self.metrics
            .get(PVALUE)
            .copied()
            .unwrap_or_else(|| permlab_core::empirical_pvalue(self.true_score, &self.permutation_scores))
    }
}

/// Permutation test bound to an estimator prototype and a configuration.
#[derive(Debug, Clone)]
pub struct PermutationTest<E: Estimator> {
    estimator: E,
    config: PermutationTestConfig,
}

impl<E: Estimator> PermutationTest<E> {
    pub fn new(estimator: E, config: PermutationTestConfig) -> Self {
        Self { estimator, config }
    }

    pub fn config(&self) -> &PermutationTestConfig {
        &self.config
    }

    /// Generate the permutation set this test would score.
    pub fn permutations(&self, data: &TestData<'_>) -> Result<PermutationSet, PermTestError> {
        self.config.validate()?;
        let n = data.validate()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        Ok(generate(
            n,
            data.blocks,
            &self.config.generator_config(),
            &mut rng,
        )?)
    }

    /// Run the full test: true score, permutation scores, metrics.
    pub fn score<C, S>(
        &self,
        data: &TestData<'_>,
        cv: &C,
        scorer: &S,
    ) -> Result<PermutationTestResult, PermTestError>
    where
        C: CrossValidator,
        S: Scorer<E>,
    {
        let permutations = self.permutations(data)?;
        tracing::info!(
            n_samples = data.n_samples(),
            n_permutations = permutations.len(),
            mode = ?self.config.mode,
            seed = self.config.seed,
            "starting permutation test"
        );

        let true_score = cross_validated_mean(&self.estimator, data, data.labels, cv, scorer, None)?;
        let permutation_scores = self.score_permutations(data, &permutations, cv, scorer)?;

        warn_non_finite(true_score, &permutation_scores);
        let summary = NullSummary::compute(true_score, &permutation_scores);
        tracing::info!(
            true_score,
            pvalue = summary.pvalue,
            null_mean = summary.null_mean,
            "permutation test complete"
        );

        Ok(PermutationTestResult {
            schema_version: SCHEMA_VERSION,
            true_score,
            permutation_scores,
            metrics: summary.to_metrics(),
            permutation_fingerprint: permutations.fingerprint(),
            config: self.config.clone(),
        })
    }

    fn score_permutations<C, S>(
        &self,
        data: &TestData<'_>,
        permutations: &PermutationSet,
        cv: &C,
        scorer: &S,
    ) -> Result<Vec<f64>, PermTestError>
    where
        C: CrossValidator,
        S: Scorer<E>,
    {
        let score_one = |(p, column): (usize, &permlab_core::Permutation)| {
            let permuted = column.apply(data.labels)?;
            cross_validated_mean(&self.estimator, data, &permuted, cv, scorer, Some(p))
        };

        let outcomes: Vec<Result<f64, PermTestError>> = match self.config.n_jobs {
            Some(1) => permutations.iter().enumerate().map(score_one).collect(),
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| PermTestError::ThreadPool(e.to_string()))?;
                pool.install(|| {
                    permutations
                        .columns()
                        .par_iter()
                        .enumerate()
                        .map(score_one)
                        .collect()
                })
            }
            None => permutations
                .columns()
                .par_iter()
                .enumerate()
                .map(score_one)
                .collect(),
        };

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            tracing::warn!(failed, total = outcomes.len(), "permutation scoring failed");
        }

        // Lowest failing permutation index wins, independent of scheduling.
        outcomes.into_iter().collect()
    }
}

/// NaN never compares `>=`, so a NaN true score yields the smallest p-value
/// and NaN permutation scores never count against it.
fn warn_non_finite(true_score: f64, permutation_scores: &[f64]) -> usize {
    let non_finite = permutation_scores.iter().filter(|s| !s.is_finite()).count();
    if !true_score.is_finite() {
        tracing::warn!(true_score, "true score is not finite; the p-value is not meaningful");
    }
    if non_finite > 0 {
        tracing::warn!(
            non_finite,
            total = permutation_scores.len(),
            "some permutation scores are not finite and never count as at least as extreme"
        );
    }
    non_finite
}

/// Mean cross-validated score of `prototype` on the true labels.
pub fn cross_validated_score<E, C, S>(
    prototype: &E,
    data: &TestData<'_>,
    cv: &C,
    scorer: &S,
) -> Result<f64, PermTestError>
where
    E: Estimator,
    C: CrossValidator,
    S: Scorer<E>,
{
    data.validate()?;
    cross_validated_mean(prototype, data, data.labels, cv, scorer, None)
}

fn cross_validated_mean<E, C, S>(
    prototype: &E,
    data: &TestData<'_>,
    labels: &[f64],
    cv: &C,
    scorer: &S,
    permutation: Option<usize>,
) -> Result<f64, PermTestError>
where
    E: Estimator,
    C: CrossValidator,
    S: Scorer<E>,
{
    let n = data.n_samples();
    let folds = cv.split(data.features, labels, data.groups);
    if folds.is_empty() {
        return Err(PermTestError::NoFolds);
    }

    let no_params = FitParams::default();
    let fit_params = data.fit_params.unwrap_or(&no_params);
    let mut total = 0.0;

    for (fold_idx, fold) in folds.iter().enumerate() {
        if let Some(&index) = fold.train.iter().chain(&fold.test).find(|&&i| i >= n) {
            return Err(PermTestError::InvalidFold {
                fold: fold_idx,
                index,
                n_samples: n,
            });
        }
        let failure = |source: BoxError| PermTestError::EstimatorFailure {
            permutation,
            fold: fold_idx,
            source,
        };

        let x_train = data.features.select_rows(&fold.train);
        let y_train = select(labels, &fold.train);
        let x_test = data.features.select_rows(&fold.test);
        let y_test = select(labels, &fold.test);

        let mut estimator = prototype.clone();
        estimator
            .fit(&x_train, &y_train, &fit_params.restrict(&fold.train))
            .map_err(failure)?;
        total += scorer.score(&estimator, &x_test, &y_test).map_err(failure)?;
    }

    Ok(total / folds.len() as f64)
}
