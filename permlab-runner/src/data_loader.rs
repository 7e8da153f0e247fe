//! CSV loading for block files, score files and numeric tables.
//!
//! All inputs are headerless. Block files carry one integer block id per
//! row in the first column (extra columns are ignored). Score files carry
//! one `f64` per line in the first column.

use std::path::Path;

use thiserror::Error;

use crate::dataset::Features;

/// Errors from the CSV loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("'{path}' line {line}: cannot parse '{value}' as {expected}")]
    Parse {
        path: String,
        line: usize,
        value: String,
        expected: &'static str,
    },

    #[error("'{path}' line {line} is empty")]
    EmptyRecord { path: String, line: usize },

    #[error("'{path}' line {line} has {actual} columns, expected {expected}")]
    Ragged {
        path: String,
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("'{path}' contains no rows")]
    Empty { path: String },
}

/// Load exchangeability block ids from the first column of a CSV file.
pub fn load_blocks_csv(path: &Path) -> Result<Vec<i64>, LoadError> {
    let blocks = read_first_column(path, "an integer block id", |s| s.parse::<i64>().ok())?;
    tracing::debug!(path = %path.display(), rows = blocks.len(), "loaded block file");
    Ok(blocks)
}

/// Load scores from the first column of a CSV file. `NaN` and infinities
/// are rejected, since they cannot be ranked against a true score.
pub fn load_scores_csv(path: &Path) -> Result<Vec<f64>, LoadError> {
    let scores = read_first_column(path, "a finite number", |s| {
        s.parse::<f64>().ok().filter(|v| v.is_finite())
    })?;
    tracing::debug!(path = %path.display(), rows = scores.len(), "loaded score file");
    Ok(scores)
}

/// Load a dense numeric table; every row must have the same width.
pub fn load_features_csv(path: &Path) -> Result<Features, LoadError> {
    let display = path.display().to_string();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line, record) in records(path)?.enumerate() {
        let line = line + 1;
        let record = record.map_err(|source| LoadError::Csv {
            path: display.clone(),
            source,
        })?;
        let row = record
            .iter()
            .map(|field| {
                let field = field.trim();
                field.parse::<f64>().map_err(|_| LoadError::Parse {
                    path: display.clone(),
                    line,
                    value: field.to_string(),
                    expected: "a number",
                })
            })
            .collect::<Result<Vec<f64>, LoadError>>()?;

        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(LoadError::Ragged {
                    path: display,
                    line,
                    expected: first.len(),
                    actual: row.len(),
                });
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(LoadError::Empty { path: display });
    }
    // Widths are checked above, so construction cannot fail.
    Features::from_rows(&rows).ok_or(LoadError::Empty { path: display })
}

fn records(path: &Path) -> Result<csv::StringRecordsIntoIter<std::fs::File>, LoadError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| LoadError::Csv {
            path: path.display().to_string(),
            source,
        })?;
    Ok(reader.into_records())
}

fn read_first_column<T>(
    path: &Path,
    expected: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>, LoadError> {
    let display = path.display().to_string();
    let mut values = Vec::new();

    for (line, record) in records(path)?.enumerate() {
        let line = line + 1;
        let record = record.map_err(|source| LoadError::Csv {
            path: display.clone(),
            source,
        })?;
        let field = match record.get(0) {
            Some(field) if !field.is_empty() => field,
            _ => {
                return Err(LoadError::EmptyRecord {
                    path: display,
                    line,
                })
            }
        };
        let value = parse(field).ok_or_else(|| LoadError::Parse {
            path: display.clone(),
            line,
            value: field.to_string(),
            expected,
        })?;
        values.push(value);
    }

    if values.is_empty() {
        return Err(LoadError::Empty { path: display });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn blocks_use_first_column_only() {
        let file = write_temp("1,0.5\n1,0.7\n2,0.1\n2,0.9\n");
        assert_eq!(load_blocks_csv(file.path()).unwrap(), vec![1, 1, 2, 2]);
    }

    #[test]
    fn negative_block_ids_are_allowed() {
        let file = write_temp("-1\n-1\n3\n3\n");
        assert_eq!(load_blocks_csv(file.path()).unwrap(), vec![-1, -1, 3, 3]);
    }

    #[test]
    fn non_integer_block_id_names_the_line() {
        let file = write_temp("1\n1\nx\n");
        let err = load_blocks_csv(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 3, .. }), "{err}");
    }

    #[test]
    fn scores_are_parsed_as_floats() {
        let file = write_temp("0.75\n 0.81 \n0.79\n");
        assert_eq!(load_scores_csv(file.path()).unwrap(), vec![0.75, 0.81, 0.79]);
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        let file = write_temp("0.75\nNaN\n0.79\n");
        let err = load_scores_csv(file.path()).unwrap_err();
        assert!(
            matches!(err, LoadError::Parse { line: 2, expected: "a finite number", .. }),
            "{err}"
        );

        let file = write_temp("inf\n");
        assert!(matches!(
            load_scores_csv(file.path()).unwrap_err(),
            LoadError::Parse { line: 1, .. }
        ));
    }

    #[test]
    fn empty_file_is_an_error() {
        let file = write_temp("");
        assert!(matches!(
            load_scores_csv(file.path()).unwrap_err(),
            LoadError::Empty { .. }
        ));
    }

    #[test]
    fn missing_file_is_a_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_scores_csv(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Csv { .. }));
    }

    #[test]
    fn features_keep_row_order() {
        let file = write_temp("1,2\n3,4\n5,6\n");
        let x = load_features_csv(file.path()).unwrap();
        assert_eq!(x.n_rows(), 3);
        assert_eq!(x.n_cols(), 2);
        assert_eq!(x.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn ragged_features_are_rejected() {
        let file = write_temp("1,2\n3\n");
        let err = load_features_csv(file.path()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Ragged { line: 2, expected: 2, actual: 1, .. }
        ));
    }
}
