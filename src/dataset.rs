//! In-memory tabular datasets and their COPY wire encoding.
//!
//! A [`Dataset`] is the unit of input for a load job: ordered column names
//! plus rows of nullable text fields. Row ranges are encoded as CSV framed
//! exactly for `COPY ... FROM STDIN WITH (FORMAT CSV, DELIMITER ',')` — no
//! header row, RFC 4180 quoting, unquoted empty for NULL and a quoted empty
//! string for `""`.
//!
//! Datasets also cross the process boundary to fan-out workers, so the type
//! is serde-serializable and doubles as the CLI input file format.

use crate::error::LoadError;
use crate::partition::RowRange;
use serde::{Deserialize, Serialize};

/// One nullable text field. `None` maps to SQL NULL on the wire.
pub type Field = Option<String>;

/// An ordered, column-named collection of rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Field>>,
}

impl Dataset {
    /// Create an empty dataset with the given column names.
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a dataset from pre-built rows, validating arity.
    pub fn from_rows<S: Into<String>>(
        columns: Vec<S>,
        rows: Vec<Vec<Field>>,
    ) -> Result<Self, LoadError> {
        let mut dataset = Self::new(columns);
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Append a row. The row must have one field per column.
    pub fn push_row(&mut self, row: Vec<Field>) -> Result<(), LoadError> {
        if row.len() != self.columns.len() {
            return Err(LoadError::Config(format!(
                "row has {} fields but dataset has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolve a column subset into positional indexes, preserving the
    /// caller's order. `None` selects all columns in their existing order.
    pub fn projection(&self, subset: Option<&[String]>) -> Result<Vec<usize>, LoadError> {
        match subset {
            None => Ok((0..self.columns.len()).collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.columns
                        .iter()
                        .position(|col| col == name)
                        .ok_or_else(|| {
                            LoadError::Config(format!("column '{}' not present in dataset", name))
                        })
                })
                .collect(),
        }
    }

    /// Comma-joined column names for a projection, in projection order.
    pub fn column_list(&self, projection: &[usize]) -> String {
        projection
            .iter()
            .map(|&i| self.columns[i].as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Encode one row range as CSV in row order over the given projection.
    pub fn encode_range(&self, range: RowRange, projection: &[usize]) -> String {
        let mut out = String::new();
        for row in &self.rows[range.start..range.end] {
            for (position, &column) in projection.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                encode_field(&mut out, row[column].as_deref());
            }
            out.push('\n');
        }
        out
    }
}

/// Append one field with RFC 4180 quoting. An absent field stays unquoted
/// and empty, which Postgres CSV input reads as NULL; an empty string is
/// quoted so it round-trips as an empty string.
fn encode_field(out: &mut String, field: Option<&str>) {
    let Some(value) = field else {
        return;
    };

    let needs_quoting = value.is_empty()
        || value.contains(',')
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if needs_quoting {
        out.push('"');
        for ch in value.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
    } else {
        out.push_str(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::split_ranges;

    fn text(value: &str) -> Field {
        Some(value.to_string())
    }

    fn sample() -> Dataset {
        Dataset::from_rows(
            vec!["id", "name", "note"],
            vec![
                vec![text("1"), text("alpha"), text("plain")],
                vec![text("2"), text("beta,comma"), None],
                vec![text("3"), text("say \"hi\""), text("")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_row_with_wrong_arity() {
        let mut dataset = Dataset::new(vec!["a", "b"]);
        let err = dataset.push_row(vec![text("1")]).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn projection_defaults_to_all_columns_in_order() {
        let dataset = sample();
        assert_eq!(dataset.projection(None).unwrap(), vec![0, 1, 2]);
        assert_eq!(dataset.column_list(&[0, 1, 2]), "id,name,note");
    }

    #[test]
    fn projection_respects_caller_order() {
        let dataset = sample();
        let subset = vec!["note".to_string(), "id".to_string()];
        let projection = dataset.projection(Some(&subset)).unwrap();
        assert_eq!(projection, vec![2, 0]);
        assert_eq!(dataset.column_list(&projection), "note,id");
    }

    #[test]
    fn projection_rejects_unknown_column() {
        let dataset = sample();
        let subset = vec!["missing".to_string()];
        let err = dataset.projection(Some(&subset)).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn encodes_without_header_in_row_order() {
        let dataset = sample();
        let range = RowRange { start: 0, end: 1 };
        assert_eq!(dataset.encode_range(range, &[0, 1, 2]), "1,alpha,plain\n");
    }

    #[test]
    fn null_is_unquoted_empty_and_empty_string_is_quoted() {
        let dataset = sample();
        let csv = dataset.encode_range(RowRange { start: 1, end: 3 }, &[0, 1, 2]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "2,\"beta,comma\",");
        assert_eq!(lines[1], "3,\"say \"\"hi\"\"\",\"\"");
    }

    #[test]
    fn range_encoding_covers_whole_dataset() {
        let dataset = sample();
        let projection = dataset.projection(None).unwrap();
        let joined: String = split_ranges(dataset.len(), 2)
            .into_iter()
            .map(|range| dataset.encode_range(range, &projection))
            .collect();
        assert_eq!(joined.lines().count(), dataset.len());
    }

    #[test]
    fn survives_json_round_trip() {
        let dataset = sample();
        let json = serde_json::to_string(&dataset).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), dataset.len());
        assert_eq!(back.columns(), dataset.columns());
    }
}
