//! Empirical p-value and null-distribution summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metric key for the empirical p-value.
pub const PVALUE: &str = "pvalue";

/// Number of permutation scores at least as large as the true score.
pub fn count_at_least(true_score: f64, permutation_scores: &[f64]) -> usize {
    permutation_scores.iter().filter(|&&s| s >= true_score).count()
}

/// `(k + 1) / (M + 1)` where `k` counts permutation scores `>= true_score`.
///
/// The unpermuted labelling counts as one draw from the null, so the result
/// lies in `(0, 1]` for every input, including an empty score list.
pub fn empirical_pvalue(true_score: f64, permutation_scores: &[f64]) -> f64 {
    let k = count_at_least(true_score, permutation_scores);
    (k as f64 + 1.0) / (permutation_scores.len() as f64 + 1.0)
}

/// Summary of a permutation test's null distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullSummary {
    pub true_score: f64,
    pub pvalue: f64,
    pub n_permutations: usize,
    pub n_at_least_as_extreme: usize,
    pub null_mean: f64,
    /// Sample standard deviation (0.0 when fewer than two scores).
    pub null_std: f64,
}

impl NullSummary {
    pub fn compute(true_score: f64, permutation_scores: &[f64]) -> Self {
        let m = permutation_scores.len();
        let null_mean = if m == 0 {
            0.0
        } else {
            permutation_scores.iter().sum::<f64>() / m as f64
        };
        let null_std = if m < 2 {
            0.0
        } else {
            let var = permutation_scores
                .iter()
                .map(|&s| (s - null_mean).powi(2))
                .sum::<f64>()
                / (m - 1) as f64;
            var.sqrt()
        };

        Self {
            true_score,
            pvalue: empirical_pvalue(true_score, permutation_scores),
            n_permutations: m,
            n_at_least_as_extreme: count_at_least(true_score, permutation_scores),
            null_mean,
            null_std,
        }
    }

    /// Flatten into the metrics mapping returned to callers.
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert(PVALUE.to_string(), self.pvalue);
        metrics.insert("true_score".to_string(), self.true_score);
        metrics.insert("n_permutations".to_string(), self.n_permutations as f64);
        metrics.insert(
            "n_at_least_as_extreme".to_string(),
            self.n_at_least_as_extreme as f64,
        );
        metrics.insert("null_mean".to_string(), self.null_mean);
        metrics.insert("null_std".to_string(), self.null_std);
        metrics
    }
}
