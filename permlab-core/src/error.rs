//! Error taxonomy for permutation generation.
//!
//! Every variant is fatal for the generation call that produced it. The
//! generator never relaxes constraints on its own; callers that hit
//! `ExhaustedSearchSpace` may retry with `allow_repeat_perms` or
//! `allow_repeat_rows` enabled.

use thiserror::Error;

/// Errors from permutation generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermutationError {
    #[error("shape mismatch: {what} has {actual} entries, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("need at least 2 samples to permute, got {n_samples}")]
    TooFewSamples { n_samples: usize },
    #[error("requested zero permutations")]
    ZeroPermutations,
    #[error(
        "block {block_id} has {size} sample(s): it cannot be permuted without repeating rows"
    )]
    InvalidBlockConfiguration { block_id: i64, size: usize },
    #[error(
        "search space exhausted: accepted {accepted} of {requested} permutations \
         after {rejections} consecutive rejected draws"
    )]
    ExhaustedSearchSpace {
        requested: usize,
        accepted: usize,
        rejections: usize,
    },
    #[error("position {position} reads source row {source_row}, but there are only {n_samples} rows")]
    SourceOutOfRange {
        position: usize,
        source_row: usize,
        n_samples: usize,
    },
    #[error("entry {value} at row {row}, column {column} is not a signed 1-based index into {n_samples} samples")]
    InvalidEntry {
        row: usize,
        column: usize,
        value: i64,
        n_samples: usize,
    },
}
