//! Exchangeability blocks: the partition of rows that permutations must respect.
//!
//! Blocks are stored in ascending block-id order so that the order in which
//! the generator consumes randomness depends only on the block labels, not
//! on how rows happen to be interleaved in the input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PermutationError;

/// Block id used when no exchangeability blocks are supplied.
pub const IMPLICIT_BLOCK_ID: i64 = 0;

/// A single exchangeability block: its id and member rows (ascending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub rows: Vec<usize>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A block of one row can only map that row onto itself.
    pub fn is_singleton(&self) -> bool {
        self.rows.len() == 1
    }
}

/// Partition of `0..n_samples` into exchangeability blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeabilityBlocks {
    n_samples: usize,
    blocks: Vec<Block>,
    /// `block_of[row]` = index into `blocks`.
    block_of: Vec<usize>,
}

impl ExchangeabilityBlocks {
    /// One implicit block containing every row.
    pub fn single(n_samples: usize) -> Self {
        Self {
            n_samples,
            blocks: vec![Block {
                id: IMPLICIT_BLOCK_ID,
                rows: (0..n_samples).collect(),
            }],
            block_of: vec![0; n_samples],
        }
    }

    /// Partition rows by their block label.
    ///
    /// `labels[row]` is the block id of `row`; the slice length must equal
    /// `n_samples`.
    pub fn from_labels(n_samples: usize, labels: &[i64]) -> Result<Self, PermutationError> {
        if labels.len() != n_samples {
            return Err(PermutationError::ShapeMismatch {
                what: "exchangeability blocks",
                expected: n_samples,
                actual: labels.len(),
            });
        }

        let mut grouped: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, &id) in labels.iter().enumerate() {
            grouped.entry(id).or_default().push(row);
        }

        let mut block_of = vec![0; n_samples];
        let blocks: Vec<Block> = grouped
            .into_iter()
            .enumerate()
            .map(|(idx, (id, rows))| {
                for &row in &rows {
                    block_of[row] = idx;
                }
                Block { id, rows }
            })
            .collect();

        Ok(Self {
            n_samples,
            blocks,
            block_of,
        })
    }

    /// Build from optional labels; `None` yields the single implicit block.
    pub fn from_optional(n_samples: usize, labels: Option<&[i64]>) -> Result<Self, PermutationError> {
        match labels {
            Some(labels) => Self::from_labels(n_samples, labels),
            None => Ok(Self::single(n_samples)),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether two rows belong to the same block.
    pub fn same_block(&self, a: usize, b: usize) -> bool {
        self.block_of[a] == self.block_of[b]
    }

    /// First block holding a single row, if any.
    pub fn first_singleton(&self) -> Option<&Block> {
        self.blocks.iter().find(|b| b.is_singleton())
    }

    /// Upper bound on the number of distinct row arrangements (∏ |block|!).
    ///
    /// Saturates at `u128::MAX`.
    pub fn arrangement_count(&self) -> u128 {
        self.blocks
            .iter()
            .fold(1u128, |acc, b| acc.saturating_mul(factorial(b.len())))
    }
}

fn factorial(n: usize) -> u128 {
    (2..=n as u128).fold(1u128, |acc, k| acc.saturating_mul(k))
}
