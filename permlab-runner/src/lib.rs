//! PermLab Runner — permutation test driver, configuration, loading, export.
//!
//! This crate builds on `permlab-core` to provide:
//! - Collaborator traits for estimators, cross-validators and scorers
//! - The permutation test driver (true score, parallel permutation scores,
//!   empirical p-value)
//! - TOML configuration
//! - CSV loading of block, score and feature files
//! - CSV/JSON export of permutation matrices and results

pub mod config;
pub mod data_loader;
pub mod dataset;
pub mod driver;
pub mod export;
pub mod traits;

pub use config::{ConfigError, PermutationTestConfig};
pub use data_loader::{load_blocks_csv, load_features_csv, load_scores_csv, LoadError};
pub use dataset::{select, Features, FitParams};
pub use driver::{
    cross_validated_score, PermTestError, PermutationTest, PermutationTestResult, TestData,
    SCHEMA_VERSION,
};
pub use export::{
    export_permutations_csv, export_permutations_json, export_result_json,
    import_permutations_csv, import_result_json, write_artifact,
};
pub use traits::{BoxError, CrossValidator, Estimator, Fold, PredefinedSplit, Scorer};
