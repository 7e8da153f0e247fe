//! PermLab Core — permutation engine for permutation tests.
//!
//! This crate decides which label permutations a permutation test uses:
//! - Exchangeability blocks (rows only move within their own block)
//! - Signed permutation entries for sign-flip null models
//! - Bounded rejection sampling that excludes identity, fixed-point and
//!   duplicate columns
//! - Empirical p-value with the +1 correction

pub mod blocks;
pub mod error;
pub mod generator;
pub mod permutation;
pub mod pvalue;

pub use blocks::{Block, ExchangeabilityBlocks};
pub use error::PermutationError;
pub use generator::{
    generate, generate_seeded, generate_with_blocks, shuffle_within_groups, GeneratorConfig,
    RandomizationMode, DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
};
pub use permutation::{Permutation, PermutationSet, Sign, SignedIndex};
pub use pvalue::{count_at_least, empirical_pvalue, NullSummary, PVALUE};
