//! Permutation generator: rejection sampling under exchangeability constraints.
//!
//! Each column is drawn by shuffling rows independently inside every
//! exchangeability block and, when signs are randomized, drawing one fair
//! sign per position. A candidate is rejected if it is the identity, if it
//! maps a row onto itself while repeat rows are disallowed, or if it
//! duplicates an accepted column while repeat permutations are disallowed.
//!
//! Fixed points are screened per block while the column is drawn; identity
//! and duplicate columns are screened once the column is complete.
//!
//! Rejection sampling is bounded: a column (or one block of it) that needs
//! more than `max_consecutive_rejections` draws fails the whole call with
//! [`PermutationError::ExhaustedSearchSpace`]. Before sampling starts a cheap
//! upper bound on the search space catches requests that can never succeed.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::blocks::ExchangeabilityBlocks;
use crate::error::PermutationError;
use crate::permutation::{Permutation, PermutationSet, Sign, SignedIndex};

/// Default cap on consecutive rejected draws for a single column.
pub const DEFAULT_MAX_CONSECUTIVE_REJECTIONS: usize = 10_000;

/// Which quantities are randomized under the null hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomizationMode {
    /// Exchangeable errors: rows are shuffled within blocks, signs stay positive.
    #[default]
    ExchangeableErrors,
    /// Rows are shuffled within blocks and every position draws a sign.
    ExchangeableAndSignFlip,
    /// Independent symmetric errors: rows stay in place, only signs are drawn.
    SignFlipOnly,
}

impl RandomizationMode {
    /// Map the boolean sign-flip switch onto a mode that always shuffles rows.
    pub fn from_sign_flip(sign_flip: bool) -> Self {
        if sign_flip {
            Self::ExchangeableAndSignFlip
        } else {
            Self::ExchangeableErrors
        }
    }

    pub fn permutes_rows(self) -> bool {
        !matches!(self, Self::SignFlipOnly)
    }

    pub fn flips_signs(self) -> bool {
        !matches!(self, Self::ExchangeableErrors)
    }
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Number of permutation columns to produce.
    pub count: usize,
    pub mode: RandomizationMode,
    /// Accept columns that map some row onto itself.
    pub allow_repeat_rows: bool,
    /// Accept columns identical to an earlier column.
    pub allow_repeat_perms: bool,
    /// Consecutive rejected draws tolerated for one column.
    pub max_consecutive_rejections: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 100,
            mode: RandomizationMode::ExchangeableErrors,
            allow_repeat_rows: false,
            allow_repeat_perms: false,
            max_consecutive_rejections: DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
        }
    }
}

impl GeneratorConfig {
    pub fn with_count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Whether the fixed-point constraint applies. Rows never move in
    /// sign-flip-only mode, so the constraint is meaningless there.
    fn rejects_repeat_rows(&self) -> bool {
        !self.allow_repeat_rows && self.mode.permutes_rows()
    }
}

/// Why a candidate was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Identity,
    RepeatRow,
    Duplicate,
}

#[derive(Debug, Default)]
struct RejectionTally {
    identity: usize,
    repeat_row: usize,
    duplicate: usize,
}

impl RejectionTally {
    fn record(&mut self, reason: Rejection) {
        match reason {
            Rejection::Identity => self.identity += 1,
            Rejection::RepeatRow => self.repeat_row += 1,
            Rejection::Duplicate => self.duplicate += 1,
        }
    }

    fn total(&self) -> usize {
        self.identity + self.repeat_row + self.duplicate
    }

    /// Complete candidates discarded after drawing. Per-block fixed-point
    /// redraws are excluded: derangement redraws are expected for every
    /// block and say nothing about how crowded the admissible set is.
    fn screened_out(&self) -> usize {
        self.identity + self.duplicate
    }

    /// More than half of the complete candidates were screened out.
    fn mostly_screened_out(&self, accepted: usize) -> bool {
        let screened_out = self.screened_out();
        screened_out * 2 > screened_out + accepted
    }
}

/// Generate a permutation set for `n_samples` rows.
///
/// `block_labels[row]` assigns each row to an exchangeability block; `None`
/// puts every row in one block.
pub fn generate(
    n_samples: usize,
    block_labels: Option<&[i64]>,
    config: &GeneratorConfig,
    rng: &mut StdRng,
) -> Result<PermutationSet, PermutationError> {
    if n_samples < 2 {
        return Err(PermutationError::TooFewSamples { n_samples });
    }
    let blocks = ExchangeabilityBlocks::from_optional(n_samples, block_labels)?;
    generate_with_blocks(&blocks, config, rng)
}

/// Same as [`generate`], with a fresh `StdRng` seeded from `seed`.
pub fn generate_seeded(
    n_samples: usize,
    block_labels: Option<&[i64]>,
    config: &GeneratorConfig,
    seed: u64,
) -> Result<PermutationSet, PermutationError> {
    let mut rng = StdRng::seed_from_u64(seed);
    generate(n_samples, block_labels, config, &mut rng)
}

/// Generate a permutation set over an already partitioned row set.
pub fn generate_with_blocks(
    blocks: &ExchangeabilityBlocks,
    config: &GeneratorConfig,
    rng: &mut StdRng,
) -> Result<PermutationSet, PermutationError> {
    let n_samples = blocks.n_samples();
    if n_samples < 2 {
        return Err(PermutationError::TooFewSamples { n_samples });
    }
    if config.count == 0 {
        return Err(PermutationError::ZeroPermutations);
    }
    if config.rejects_repeat_rows() {
        if let Some(block) = blocks.first_singleton() {
            return Err(PermutationError::InvalidBlockConfiguration {
                block_id: block.id,
                size: block.len(),
            });
        }
    }

    let bound = non_identity_upper_bound(blocks, config.mode);
    if bound == 0 || (!config.allow_repeat_perms && bound < config.count as u128) {
        return Err(PermutationError::ExhaustedSearchSpace {
            requested: config.count,
            accepted: 0,
            rejections: 0,
        });
    }

    let mut columns: Vec<Permutation> = Vec::with_capacity(config.count);
    let mut seen: HashSet<Permutation> = HashSet::new();
    let mut scratch: Vec<usize> = Vec::with_capacity(n_samples);
    let mut tally = RejectionTally::default();

    while columns.len() < config.count {
        let mut consecutive = 0usize;
        let candidate = loop {
            let Some(candidate) = draw_candidate(blocks, config, rng, &mut scratch, &mut tally)
            else {
                let cap = config.max_consecutive_rejections;
                return Err(exhausted(config, columns.len(), cap, &tally));
            };
            match screen(&candidate, config, &seen) {
                None => break candidate,
                Some(reason) => {
                    tally.record(reason);
                    consecutive += 1;
                    if consecutive >= config.max_consecutive_rejections {
                        return Err(exhausted(config, columns.len(), consecutive, &tally));
                    }
                }
            }
        };

        if !config.allow_repeat_perms {
            seen.insert(candidate.clone());
        }
        columns.push(candidate);
    }

    let draws = tally.total() + columns.len();
    tracing::debug!(
        n_samples,
        blocks = blocks.len(),
        count = config.count,
        mode = ?config.mode,
        draws,
        identity = tally.identity,
        repeat_row = tally.repeat_row,
        duplicate = tally.duplicate,
        "permutation set generated"
    );
    if tally.mostly_screened_out(columns.len()) {
        tracing::warn!(
            rejected = tally.screened_out(),
            accepted = columns.len(),
            "more than half of complete candidates were rejected as identity or duplicate; \
             the admissible search space is nearly exhausted"
        );
    }

    Ok(PermutationSet::new(n_samples, columns))
}

fn exhausted(
    config: &GeneratorConfig,
    accepted: usize,
    rejections: usize,
    tally: &RejectionTally,
) -> PermutationError {
    tracing::debug!(
        accepted,
        requested = config.count,
        rejections,
        identity = tally.identity,
        repeat_row = tally.repeat_row,
        duplicate = tally.duplicate,
        "rejection cap reached"
    );
    PermutationError::ExhaustedSearchSpace {
        requested: config.count,
        accepted,
        rejections,
    }
}

/// Draw one candidate column: a uniform shuffle inside every block, then one
/// independent fair sign per position if the mode randomizes signs.
///
/// When repeat rows are disallowed each block is redrawn until it has no
/// fixed point. Blocks are independent, so this samples the same
/// distribution as redrawing the whole column, without the acceptance rate
/// collapsing as the number of blocks grows. Returns `None` if one block
/// exceeds the rejection cap.
fn draw_candidate(
    blocks: &ExchangeabilityBlocks,
    config: &GeneratorConfig,
    rng: &mut StdRng,
    scratch: &mut Vec<usize>,
    tally: &mut RejectionTally,
) -> Option<Permutation> {
    let mut entries: Vec<SignedIndex> = (0..blocks.n_samples()).map(SignedIndex::positive).collect();

    if config.mode.permutes_rows() {
        for block in blocks.blocks() {
            let mut redraws = 0usize;
            loop {
                scratch.clear();
                scratch.extend_from_slice(&block.rows);
                scratch.shuffle(rng);
                let fixed = block.rows.iter().zip(scratch.iter()).any(|(pos, src)| pos == src);
                if !(fixed && config.rejects_repeat_rows()) {
                    break;
                }
                tally.record(Rejection::RepeatRow);
                redraws += 1;
                if redraws >= config.max_consecutive_rejections {
                    return None;
                }
            }
            for (&pos, &source) in block.rows.iter().zip(scratch.iter()) {
                entries[pos].source = source;
            }
        }
    }

    if config.mode.flips_signs() {
        for entry in entries.iter_mut() {
            if rng.gen::<bool>() {
                entry.sign = Sign::Negative;
            }
        }
    }

    Some(Permutation::from_valid_entries(entries))
}

fn screen(
    candidate: &Permutation,
    config: &GeneratorConfig,
    seen: &HashSet<Permutation>,
) -> Option<Rejection> {
    if candidate.is_identity() {
        return Some(Rejection::Identity);
    }
    if !config.allow_repeat_perms && seen.contains(candidate) {
        return Some(Rejection::Duplicate);
    }
    None
}

/// Upper bound on distinct non-identity candidates, ignoring the fixed-point
/// constraint. Saturates at `u128::MAX`.
fn non_identity_upper_bound(blocks: &ExchangeabilityBlocks, mode: RandomizationMode) -> u128 {
    let arrangements = if mode.permutes_rows() {
        blocks.arrangement_count()
    } else {
        1
    };
    let sign_patterns = if mode.flips_signs() {
        let n = blocks.n_samples();
        if n >= 128 {
            u128::MAX
        } else {
            1u128 << n
        }
    } else {
        1
    };
    arrangements.saturating_mul(sign_patterns).saturating_sub(1)
}

/// Shuffled copy of `labels`; with `groups`, values only move among rows
/// sharing a group id.
pub fn shuffle_within_groups(
    labels: &[f64],
    groups: Option<&[i64]>,
    rng: &mut StdRng,
) -> Result<Vec<f64>, PermutationError> {
    let blocks = ExchangeabilityBlocks::from_optional(labels.len(), groups)?;
    let mut indices: Vec<usize> = (0..labels.len()).collect();
    let mut scratch = Vec::new();
    for block in blocks.blocks() {
        scratch.clear();
        scratch.extend_from_slice(&block.rows);
        scratch.shuffle(rng);
        for (&pos, &source) in block.rows.iter().zip(scratch.iter()) {
            indices[pos] = source;
        }
    }
    Ok(indices.into_iter().map(|i| labels[i]).collect())
}
