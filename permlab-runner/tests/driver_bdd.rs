//! BDD tests for the permutation test driver.
//!
//! These tests verify the driver end to end with small in-test models:
//! - p-value bounds for informative and uninformative labels
//! - Deterministic, schedule-independent results
//! - Error attribution (true pass vs. lowest failing permutation)
//! - Generation errors abort before any scoring
//! - Fit parameters and groups reach the collaborators

use std::sync::Mutex;

use permlab_core::{PermutationError, RandomizationMode, PVALUE};
use permlab_runner::{
    BoxError, CrossValidator, Estimator, Features, FitParams, Fold, PermTestError,
    PermutationTest, PermutationTestConfig, TestData,
};

// ─── Collaborators ──────────────────────────────────────────────────

/// Least-squares slope through the origin on the first feature.
#[derive(Debug, Clone, Default)]
struct SlopeModel {
    slope: f64,
}

impl Estimator for SlopeModel {
    fn fit(&mut self, x: &Features, y: &[f64], _params: &FitParams) -> Result<(), BoxError> {
        let sxy: f64 = x.rows().zip(y).map(|(r, v)| r[0] * v).sum();
        let sxx: f64 = x.rows().map(|r| r[0] * r[0]).sum();
        if sxx == 0.0 {
            return Err("degenerate design".into());
        }
        self.slope = sxy / sxx;
        Ok(())
    }
}

fn neg_mse(model: &SlopeModel, x: &Features, y: &[f64]) -> Result<f64, BoxError> {
    let sse: f64 = x
        .rows()
        .zip(y)
        .map(|(r, v)| (v - model.slope * r[0]).powi(2))
        .sum();
    Ok(-sse / y.len() as f64)
}

/// Fails whenever its training labels are not in ascending order.
#[derive(Debug, Clone, Default)]
struct SortedOnlyModel;

impl Estimator for SortedOnlyModel {
    fn fit(&mut self, _x: &Features, y: &[f64], _params: &FitParams) -> Result<(), BoxError> {
        if y.windows(2).all(|w| w[0] <= w[1]) {
            Ok(())
        } else {
            Err("labels out of order".into())
        }
    }
}

fn zero_score(_model: &SortedOnlyModel, _x: &Features, _y: &[f64]) -> Result<f64, BoxError> {
    Ok(0.0)
}

/// Contiguous k-fold.
#[derive(Debug, Clone)]
struct KFold {
    k: usize,
}

impl CrossValidator for KFold {
    fn split(&self, x: &Features, _y: &[f64], _groups: Option<&[i64]>) -> Vec<Fold> {
        let n = x.n_rows();
        (0..self.k)
            .map(|f| {
                let (start, end) = (f * n / self.k, (f + 1) * n / self.k);
                Fold {
                    train: (0..n).filter(|i| *i < start || *i >= end).collect(),
                    test: (start..end).collect(),
                }
            })
            .collect()
    }
}

/// KFold that records every label vector it is asked to split.
#[derive(Debug, Default)]
struct RecordingKFold {
    seen: Mutex<Vec<Vec<f64>>>,
}

impl CrossValidator for RecordingKFold {
    fn split(&self, x: &Features, y: &[f64], groups: Option<&[i64]>) -> Vec<Fold> {
        self.seen.lock().unwrap().push(y.to_vec());
        KFold { k: 2 }.split(x, y, groups)
    }
}

/// One fold per distinct group, held out in turn.
#[derive(Debug, Clone)]
struct LeaveOneGroupOut;

impl CrossValidator for LeaveOneGroupOut {
    fn split(&self, _x: &Features, _y: &[f64], groups: Option<&[i64]>) -> Vec<Fold> {
        let Some(groups) = groups else {
            return Vec::new();
        };
        let mut ids: Vec<i64> = groups.to_vec();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .map(|g| Fold {
                train: (0..groups.len()).filter(|&i| groups[i] != g).collect(),
                test: (0..groups.len()).filter(|&i| groups[i] == g).collect(),
            })
            .collect()
    }
}

/// Requires a `sample_weight` aligned with its training rows.
#[derive(Debug, Clone, Default)]
struct WeightedMean {
    mean: f64,
}

impl Estimator for WeightedMean {
    fn fit(&mut self, _x: &Features, y: &[f64], params: &FitParams) -> Result<(), BoxError> {
        let w = params
            .per_sample
            .get("sample_weight")
            .ok_or("sample_weight missing")?;
        if w.len() != y.len() {
            return Err(format!("{} weights for {} labels", w.len(), y.len()).into());
        }
        let total: f64 = w.iter().sum();
        self.mean = w.iter().zip(y).map(|(w, v)| w * v).sum::<f64>() / total;
        Ok(())
    }
}

fn weighted_neg_mae(model: &WeightedMean, _x: &Features, y: &[f64]) -> Result<f64, BoxError> {
    Ok(-y.iter().map(|v| (v - model.mean).abs()).sum::<f64>() / y.len() as f64)
}

fn linear_data(n: usize) -> (Features, Vec<f64>) {
    let xs: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let y = xs.iter().map(|x| 2.0 * x).collect();
    (Features::from_row_major(n, 1, xs).unwrap(), y)
}

fn config(n_permutations: usize, seed: u64) -> PermutationTestConfig {
    PermutationTestConfig {
        n_permutations,
        seed,
        ..PermutationTestConfig::default()
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[test]
fn bdd_scenario_informative_labels_reach_the_minimum_pvalue() {
    // GIVEN labels that are an exact linear function of the feature
    let (x, y) = linear_data(12);
    let test = PermutationTest::new(SlopeModel::default(), config(49, 42));

    // WHEN the permutation test runs with 3-fold CV
    let result = test
        .score(&TestData::new(&x, &y), &KFold { k: 3 }, &neg_mse)
        .expect("test should run");

    // THEN the true fit is perfect and no permutation matches it
    assert_eq!(result.true_score, 0.0);
    assert_eq!(result.permutation_scores.len(), 49);
    assert!(result.permutation_scores.iter().all(|s| *s < 0.0));

    // AND the p-value is the smallest attainable, 1 / (M + 1)
    assert!((result.pvalue() - 1.0 / 50.0).abs() < 1e-12);
    assert_eq!(result.metrics[PVALUE], result.pvalue());
    assert_eq!(result.metrics["n_at_least_as_extreme"], 0.0);
}

#[test]
fn bdd_scenario_constant_labels_give_pvalue_one() {
    // GIVEN labels that carry no information (all equal)
    let (x, _) = linear_data(8);
    let y = vec![3.0; 8];
    let test = PermutationTest::new(
        WeightedMean::default(),
        config(20, 7),
    );
    let weights = FitParams::new().with_per_sample("sample_weight", vec![1.0; 8]);

    // WHEN the permutation test runs
    let result = test
        .score(
            &TestData::new(&x, &y).with_fit_params(&weights),
            &KFold { k: 2 },
            &weighted_neg_mae,
        )
        .unwrap();

    // THEN every permutation ties the true score and p = 1
    assert!(result
        .permutation_scores
        .iter()
        .all(|s| *s == result.true_score));
    assert_eq!(result.pvalue(), 1.0);
}

#[test]
fn bdd_scenario_results_are_reproducible_and_schedule_independent() {
    // GIVEN the same data and seed under three threading setups
    let (x, mut y) = linear_data(10);
    y[3] += 1.5;
    y[7] -= 0.5;
    let data = TestData::new(&x, &y);

    let run = |n_jobs: Option<usize>| {
        let config = PermutationTestConfig {
            n_jobs,
            mode: RandomizationMode::ExchangeableAndSignFlip,
            ..config(30, 99)
        };
        PermutationTest::new(SlopeModel::default(), config)
            .score(&data, &KFold { k: 5 }, &neg_mse)
            .unwrap()
    };

    // WHEN each setup runs the test
    let sequential = run(Some(1));
    let pooled = run(Some(3));
    let global = run(None);

    // THEN scores, metrics and fingerprints are identical
    assert_eq!(sequential.permutation_scores, pooled.permutation_scores);
    assert_eq!(sequential.permutation_scores, global.permutation_scores);
    assert_eq!(sequential.metrics, global.metrics);
    assert_eq!(
        sequential.permutation_fingerprint,
        pooled.permutation_fingerprint
    );

    // AND a second sequential run reproduces the first exactly
    assert_eq!(run(Some(1)), sequential);
}

#[test]
fn bdd_scenario_splitter_sees_permuted_labels() {
    // GIVEN a splitter that records the labels it is given
    let (x, y) = linear_data(6);
    let cv = RecordingKFold::default();
    let config = PermutationTestConfig {
        n_jobs: Some(1),
        ..config(4, 5)
    };
    let test = PermutationTest::new(SlopeModel::default(), config);
    let data = TestData::new(&x, &y);

    // WHEN the test runs sequentially
    test.score(&data, &cv, &neg_mse).unwrap();

    // THEN the splitter saw the true labels first, then each permuted vector
    let seen = cv.seen.into_inner().unwrap();
    let perms = test.permutations(&data).unwrap();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], y);
    for (p, column) in perms.iter().enumerate() {
        assert_eq!(seen[p + 1], column.apply(&y).unwrap());
    }
}

#[test]
fn bdd_scenario_true_pass_failure_is_attributed_to_no_permutation() {
    // GIVEN a model that rejects unsorted labels and descending true labels
    let (x, mut y) = linear_data(6);
    y.reverse();
    let test = PermutationTest::new(SortedOnlyModel, config(5, 1));

    // WHEN the test runs
    let err = test
        .score(&TestData::new(&x, &y), &KFold { k: 2 }, &zero_score)
        .unwrap_err();

    // THEN the failure points at the true-label pass, first fold
    assert!(
        matches!(
            err,
            PermTestError::EstimatorFailure { permutation: None, fold: 0, .. }
        ),
        "{err}"
    );
}

#[test]
fn bdd_scenario_lowest_failing_permutation_is_reported() {
    // GIVEN ascending true labels (the true pass succeeds) and a model that
    // fails on any unsorted training partition
    let (x, y) = linear_data(8);
    let cv = KFold { k: 2 };
    let data = TestData::new(&x, &y);

    // AND the failure we expect: the first permutation with an unsorted
    // training partition, and the first such fold within it
    let probe = PermutationTest::new(SortedOnlyModel, config(25, 17));
    let perms = probe.permutations(&data).unwrap();
    let folds = cv.split(&x, &y, None);
    let expected = perms.iter().enumerate().find_map(|(p, column)| {
        let permuted = column.apply(&y).unwrap();
        folds
            .iter()
            .position(|f| {
                let train: Vec<f64> = f.train.iter().map(|&i| permuted[i]).collect();
                !train.windows(2).all(|w| w[0] <= w[1])
            })
            .map(|fold| (p, fold))
    });
    let (expected_p, expected_fold) = expected.expect("some permutation must fail");

    // WHEN the test runs sequentially and on a pool
    for n_jobs in [Some(1), Some(4), None] {
        let config = PermutationTestConfig {
            n_jobs,
            ..config(25, 17)
        };
        let err = PermutationTest::new(SortedOnlyModel, config)
            .score(&data, &cv, &zero_score)
            .unwrap_err();

        // THEN the same lowest-index failure is reported every time
        match err {
            PermTestError::EstimatorFailure {
                permutation, fold, ..
            } => {
                assert_eq!(permutation, Some(expected_p));
                assert_eq!(fold, expected_fold);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn bdd_scenario_generation_errors_abort_before_scoring() {
    // GIVEN a block layout with a singleton block
    let (x, y) = linear_data(5);
    let blocks = [1, 1, 2, 2, 3];
    let cv = RecordingKFold::default();
    let test = PermutationTest::new(SlopeModel::default(), config(3, 0));

    // WHEN the test runs
    let err = test
        .score(&TestData::new(&x, &y).with_blocks(&blocks), &cv, &neg_mse)
        .unwrap_err();

    // THEN generation fails and the splitter was never consulted
    assert!(matches!(
        err,
        PermTestError::Generation(PermutationError::InvalidBlockConfiguration {
            block_id: 3,
            size: 1
        })
    ));
    assert!(cv.seen.into_inner().unwrap().is_empty());
}

#[test]
fn bdd_scenario_blocks_keep_permuted_labels_inside_their_block() {
    // GIVEN two blocks with disjoint label ranges
    let (x, _) = linear_data(8);
    let y = vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0];
    let blocks = [0, 0, 0, 0, 1, 1, 1, 1];
    let cv = RecordingKFold::default();
    let config = PermutationTestConfig {
        n_jobs: Some(1),
        ..config(10, 3)
    };

    // WHEN the test runs
    PermutationTest::new(SlopeModel::default(), config)
        .score(&TestData::new(&x, &y).with_blocks(&blocks), &cv, &neg_mse)
        .unwrap();

    // THEN every permuted label vector keeps each block's labels in place
    for labels in cv.seen.into_inner().unwrap().iter().skip(1) {
        assert!(labels[..4].iter().all(|v| *v < 5.0));
        assert!(labels[4..].iter().all(|v| *v >= 10.0));
    }
}

#[test]
fn bdd_scenario_groups_and_fit_params_reach_collaborators() {
    // GIVEN three groups and per-sample weights
    let (x, y) = linear_data(9);
    let groups = [0, 0, 0, 1, 1, 1, 2, 2, 2];
    let weights = FitParams::new()
        .with_per_sample("sample_weight", vec![1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 1.0, 2.0, 1.0])
        .with_scalar("alpha", 0.1);
    let test = PermutationTest::new(WeightedMean::default(), config(10, 8));

    // WHEN leave-one-group-out drives the folds
    let result = test
        .score(
            &TestData::new(&x, &y)
                .with_groups(&groups)
                .with_fit_params(&weights),
            &LeaveOneGroupOut,
            &weighted_neg_mae,
        )
        .expect("weights must be restricted to each fold's training rows");

    // THEN scoring completes for every permutation
    assert_eq!(result.permutation_scores.len(), 10);
    assert!(result.true_score < 0.0);
}

#[test]
fn bdd_scenario_shape_mismatches_are_rejected() {
    // GIVEN blocks shorter than the dataset
    let (x, y) = linear_data(6);
    let test = PermutationTest::new(SlopeModel::default(), config(3, 0));

    // WHEN the test runs
    let err = test
        .score(
            &TestData::new(&x, &y).with_blocks(&[0, 0, 1, 1]),
            &KFold { k: 2 },
            &neg_mse,
        )
        .unwrap_err();

    // THEN the mismatch is reported with both lengths
    assert!(matches!(
        err,
        PermTestError::ShapeMismatch { expected: 6, actual: 4, .. }
    ));
}

#[test]
fn bdd_scenario_invalid_config_is_rejected() {
    // GIVEN a configuration requesting zero scoring threads
    let (x, y) = linear_data(6);
    let config = PermutationTestConfig {
        n_jobs: Some(0),
        ..config(3, 0)
    };

    // WHEN the test runs
    let err = PermutationTest::new(SlopeModel::default(), config)
        .score(&TestData::new(&x, &y), &KFold { k: 2 }, &neg_mse)
        .unwrap_err();

    // THEN validation fails before anything else
    assert!(matches!(err, PermTestError::Config(_)));
}
