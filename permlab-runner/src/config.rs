//! Serializable permutation test configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! n_permutations = 1000
//! seed = 7
//! mode = "exchangeable_and_sign_flip"
//! allow_repeat_rows = false
//! allow_repeat_perms = false
//! max_consecutive_rejections = 10000
//! n_jobs = 4
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use permlab_core::{GeneratorConfig, RandomizationMode, DEFAULT_MAX_CONSECUTIVE_REJECTIONS};

/// Errors from reading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one permutation test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermutationTestConfig {
    /// Number of label permutations to score.
    pub n_permutations: usize,
    /// Seed for the permutation generator.
    pub seed: u64,
    pub mode: RandomizationMode,
    pub allow_repeat_rows: bool,
    pub allow_repeat_perms: bool,
    pub max_consecutive_rejections: usize,
    /// Scoring threads. `None` uses the global rayon pool, `Some(1)` runs
    /// sequentially, `Some(n)` builds a private pool of `n` threads.
    pub n_jobs: Option<usize>,
}

impl Default for PermutationTestConfig {
    fn default() -> Self {
        Self {
            n_permutations: 100,
            seed: 0,
            mode: RandomizationMode::ExchangeableErrors,
            allow_repeat_rows: false,
            allow_repeat_perms: false,
            max_consecutive_rejections: DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
            n_jobs: None,
        }
    }
}

impl PermutationTestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_permutations == 0 {
            return Err(ConfigError::Invalid("n_permutations must be at least 1".into()));
        }
        if self.max_consecutive_rejections == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_rejections must be at least 1".into(),
            ));
        }
        if self.n_jobs == Some(0) {
            return Err(ConfigError::Invalid("n_jobs must be at least 1".into()));
        }
        Ok(())
    }

    /// Generator settings derived from this configuration.
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            count: self.n_permutations,
            mode: self.mode,
            allow_repeat_rows: self.allow_repeat_rows,
            allow_repeat_perms: self.allow_repeat_perms,
            max_consecutive_rejections: self.max_consecutive_rejections,
        }
    }
}
