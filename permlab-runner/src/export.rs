//! Export: permutation matrices and test results.
//!
//! - **CSV**: permutation matrix as N rows × M columns of signed 1-based
//!   indices (row `i`, column `p` = source row of position `i` in
//!   permutation `p`, negative when the sign is flipped)
//! - **JSON**: permutation set and `PermutationTestResult` via serde
//!
//! Persisted results carry a `schema_version`. Newer versions are rejected
//! on load.

use std::path::Path;

use anyhow::{bail, Context, Result};
use permlab_core::PermutationSet;

use crate::driver::{PermutationTestResult, SCHEMA_VERSION};

// ─── Permutation matrix ─────────────────────────────────────────────

/// Render a permutation set as a headerless signed-index CSV matrix.
pub fn export_permutations_csv(set: &PermutationSet) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in set.to_signed_matrix() {
        wtr.write_record(row.iter().map(i64::to_string))
            .context("failed to write permutation matrix row")?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV writer: {e}"))?;
    String::from_utf8(bytes).context("permutation matrix CSV is not valid UTF-8")
}

/// Parse a signed-index CSV matrix back into a permutation set.
pub fn import_permutations_csv(content: &str) -> Result<PermutationSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows: Vec<Vec<i64>> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV at line {}", line + 1))?;
        let row = record
            .iter()
            .map(|field| {
                field
                    .parse::<i64>()
                    .with_context(|| format!("line {}: '{field}' is not an integer", line + 1))
            })
            .collect::<Result<Vec<i64>>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        bail!("permutation matrix is empty");
    }

    PermutationSet::from_signed_matrix(&rows).context("invalid permutation matrix")
}

/// Serialize a permutation set to pretty JSON.
pub fn export_permutations_json(set: &PermutationSet) -> Result<String> {
    serde_json::to_string_pretty(set).context("failed to serialize PermutationSet to JSON")
}

// ─── Results ────────────────────────────────────────────────────────

/// Serialize a `PermutationTestResult` to pretty JSON.
pub fn export_result_json(result: &PermutationTestResult) -> Result<String> {
    serde_json::to_string_pretty(result)
        .context("failed to serialize PermutationTestResult to JSON")
}

/// Deserialize a `PermutationTestResult`, rejecting unknown schema versions.
pub fn import_result_json(json: &str) -> Result<PermutationTestResult> {
    let result: PermutationTestResult = serde_json::from_str(json)
        .context("failed to deserialize PermutationTestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

/// Write `content` to `path`, creating parent directories.
pub fn write_artifact(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PermutationTestConfig;
    use permlab_core::{generate_seeded, GeneratorConfig, RandomizationMode, PVALUE};
    use std::collections::BTreeMap;

    fn sample_set() -> PermutationSet {
        let config = GeneratorConfig {
            mode: RandomizationMode::ExchangeableAndSignFlip,
            ..GeneratorConfig::with_count(4)
        };
        generate_seeded(5, None, &config, 11).unwrap()
    }

    fn sample_result() -> PermutationTestResult {
        let mut metrics = BTreeMap::new();
        metrics.insert(PVALUE.to_string(), 0.5);
        PermutationTestResult {
            schema_version: SCHEMA_VERSION,
            true_score: 0.8,
            permutation_scores: vec![0.75, 0.81, 0.79, 0.90, 0.60],
            metrics,
            permutation_fingerprint: "abc".into(),
            config: PermutationTestConfig::default(),
        }
    }

    #[test]
    fn csv_matrix_has_one_row_per_sample() {
        let set = sample_set();
        let csv = export_permutations_csv(&set).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| l.split(',').count() == 4));
    }

    #[test]
    fn csv_matrix_reimports_to_the_same_set() {
        let set = sample_set();
        let csv = export_permutations_csv(&set).unwrap();
        let back = import_permutations_csv(&csv).unwrap();
        assert_eq!(back.fingerprint(), set.fingerprint());
    }

    #[test]
    fn csv_import_rejects_zero_index() {
        let err = import_permutations_csv("2,1\n0,2\n").unwrap_err();
        assert!(format!("{err:#}").contains("not a signed 1-based index"));
    }

    #[test]
    fn json_set_export_is_parseable() {
        let set = sample_set();
        let json = export_permutations_json(&set).unwrap();
        let back: PermutationSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn result_json_round_trip() {
        let result = sample_result();
        let json = export_result_json(&result).unwrap();
        assert!(json.contains("\"schema_version\": 1"));
        assert_eq!(import_result_json(&json).unwrap(), result);
    }

    #[test]
    fn result_json_rejects_future_schema() {
        let mut result = sample_result();
        result.schema_version = SCHEMA_VERSION + 1;
        let json = serde_json::to_string(&result).unwrap();
        let err = import_result_json(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn write_artifact_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("perms.csv");
        write_artifact(&path, "1,2\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "1,2\n");
    }
}
