//! Permutation vectors and sets.
//!
//! A [`Permutation`] maps every output position to a source row and a sign.
//! Applying it to a label vector yields `labels[source] * sign` at each
//! position. A [`PermutationSet`] is the ordered, immutable collection of
//! columns produced for one test invocation.

use serde::{Deserialize, Serialize};

use crate::error::PermutationError;

/// Sign carried by a permutation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn as_f64(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }

    pub fn is_negative(self) -> bool {
        self == Sign::Negative
    }
}

/// One entry of a permutation: which row to read, and whether to negate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedIndex {
    /// 0-based source row.
    pub source: usize,
    pub sign: Sign,
}

impl SignedIndex {
    pub fn positive(source: usize) -> Self {
        Self {
            source,
            sign: Sign::Positive,
        }
    }

    pub fn negative(source: usize) -> Self {
        Self {
            source,
            sign: Sign::Negative,
        }
    }

    /// PALM-style encoding: `±(source + 1)`.
    pub fn to_signed_one_based(self) -> i64 {
        let magnitude = self.source as i64 + 1;
        match self.sign {
            Sign::Positive => magnitude,
            Sign::Negative => -magnitude,
        }
    }

    /// Inverse of [`to_signed_one_based`](Self::to_signed_one_based). Zero has
    /// no 1-based meaning and yields `None`.
    pub fn from_signed_one_based(value: i64) -> Option<Self> {
        if value == 0 {
            return None;
        }
        let source = (value.unsigned_abs() - 1) as usize;
        let sign = if value < 0 {
            Sign::Negative
        } else {
            Sign::Positive
        };
        Some(Self { source, sign })
    }
}

/// A single permutation column.
///
/// Every source row is smaller than the column length; both constructors
/// and deserialization enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPermutation")]
pub struct Permutation {
    entries: Vec<SignedIndex>,
}

#[derive(Deserialize)]
struct RawPermutation {
    entries: Vec<SignedIndex>,
}

impl TryFrom<RawPermutation> for Permutation {
    type Error = PermutationError;

    fn try_from(raw: RawPermutation) -> Result<Self, Self::Error> {
        Self::from_entries(raw.entries)
    }
}

impl Permutation {
    /// Identity: every row to itself with a positive sign.
    pub fn identity(n: usize) -> Self {
        Self {
            entries: (0..n).map(SignedIndex::positive).collect(),
        }
    }

    /// Build a column from explicit entries. Fails if any source row is
    /// outside `0..entries.len()`.
    pub fn from_entries(entries: Vec<SignedIndex>) -> Result<Self, PermutationError> {
        let n_samples = entries.len();
        let out_of_range = entries.iter().enumerate().find(|(_, e)| e.source >= n_samples);
        if let Some((position, e)) = out_of_range {
            return Err(PermutationError::SourceOutOfRange {
                position,
                source_row: e.source,
                n_samples,
            });
        }
        Ok(Self { entries })
    }

    /// Caller guarantees every source row is in range.
    pub(crate) fn from_valid_entries(entries: Vec<SignedIndex>) -> Self {
        debug_assert!(entries.iter().all(|e| e.source < entries.len()));
        Self { entries }
    }

    pub fn entries(&self) -> &[SignedIndex] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when applying this column would leave the labels unchanged.
    pub fn is_identity(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(pos, e)| e.source == pos && e.sign == Sign::Positive)
    }

    /// Positions whose source row is the position itself (sign ignored).
    pub fn fixed_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(pos, e)| e.source == *pos)
            .map(|(pos, _)| pos)
    }

    pub fn has_fixed_point(&self) -> bool {
        self.fixed_points().next().is_some()
    }

    /// Positions carrying a negative sign.
    pub fn negated_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.sign.is_negative())
            .map(|(pos, _)| pos)
    }

    /// `out[i] = labels[source(i)] * sign(i)`.
    pub fn apply(&self, labels: &[f64]) -> Result<Vec<f64>, PermutationError> {
        if labels.len() != self.entries.len() {
            return Err(PermutationError::ShapeMismatch {
                what: "labels",
                expected: self.entries.len(),
                actual: labels.len(),
            });
        }
        self.entries
            .iter()
            .enumerate()
            .map(|(position, e)| {
                labels
                    .get(e.source)
                    .map(|v| v * e.sign.as_f64())
                    .ok_or(PermutationError::SourceOutOfRange {
                        position,
                        source_row: e.source,
                        n_samples: labels.len(),
                    })
            })
            .collect()
    }

    /// Column in PALM encoding (signed, 1-based).
    pub fn to_signed_one_based(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.to_signed_one_based()).collect()
    }
}

/// Ordered set of permutation columns for one test run.
///
/// Every column has exactly `n_samples` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPermutationSet")]
pub struct PermutationSet {
    n_samples: usize,
    columns: Vec<Permutation>,
}

#[derive(Deserialize)]
struct RawPermutationSet {
    n_samples: usize,
    columns: Vec<Permutation>,
}

impl TryFrom<RawPermutationSet> for PermutationSet {
    type Error = PermutationError;

    fn try_from(raw: RawPermutationSet) -> Result<Self, Self::Error> {
        if let Some(column) = raw.columns.iter().find(|c| c.len() != raw.n_samples) {
            return Err(PermutationError::ShapeMismatch {
                what: "permutation column",
                expected: raw.n_samples,
                actual: column.len(),
            });
        }
        Ok(Self::new(raw.n_samples, raw.columns))
    }
}

impl PermutationSet {
    pub(crate) fn new(n_samples: usize, columns: Vec<Permutation>) -> Self {
        Self { n_samples, columns }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn columns(&self) -> &[Permutation] {
        &self.columns
    }

    pub fn column(&self, p: usize) -> Option<&Permutation> {
        self.columns.get(p)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Permutation> {
        self.columns.iter()
    }

    /// Row-major PALM matrix: `rows[i][p]` is column `p` at position `i`.
    pub fn to_signed_matrix(&self) -> Vec<Vec<i64>> {
        let encoded: Vec<Vec<i64>> = self.columns.iter().map(|c| c.to_signed_one_based()).collect();
        (0..self.n_samples)
            .map(|i| encoded.iter().map(|col| col[i]).collect())
            .collect()
    }

    /// Rebuild a set from a row-major PALM matrix.
    ///
    /// Every row must have the same number of columns and every entry must
    /// be a nonzero index with magnitude at most the number of rows. The
    /// columns are taken as given: identity or duplicate columns are not
    /// screened out.
    pub fn from_signed_matrix(rows: &[Vec<i64>]) -> Result<Self, PermutationError> {
        let n_samples = rows.len();
        let n_columns = rows.first().map_or(0, Vec::len);
        let mut columns = vec![Vec::with_capacity(n_samples); n_columns];

        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_columns {
                return Err(PermutationError::ShapeMismatch {
                    what: "permutation matrix row",
                    expected: n_columns,
                    actual: values.len(),
                });
            }
            for (column, &value) in values.iter().enumerate() {
                let entry = SignedIndex::from_signed_one_based(value)
                    .filter(|e| e.source < n_samples)
                    .ok_or(PermutationError::InvalidEntry {
                        row,
                        column,
                        value,
                        n_samples,
                    })?;
                columns[column].push(entry);
            }
        }

        Ok(Self::new(
            n_samples,
            columns.into_iter().map(Permutation::from_valid_entries).collect(),
        ))
    }

    /// BLAKE3 digest over every entry, hex-encoded.
    ///
    /// Two sets share a fingerprint only if they have the same sample
    /// count and identical columns in the same order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.n_samples as u64).to_le_bytes());
        hasher.update(&(self.columns.len() as u64).to_le_bytes());
        for column in &self.columns {
            for entry in column.entries() {
                hasher.update(&entry.to_signed_one_based().to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl<'a> IntoIterator for &'a PermutationSet {
    type Item = &'a Permutation;
    type IntoIter = std::slice::Iter<'a, Permutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
