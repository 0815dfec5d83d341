use std::collections::BTreeMap;

use crate::error::ReconError;
use crate::model::InputRow;
use crate::normalize::normalize_label;

pub const LABEL_FIELD: &str = "label";
pub const CONTEXT_FIELD: &str = "context";

/// A named column to discover by header text.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub needle: String,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, needle: &str) -> Self {
        Self {
            name: name.to_string(),
            needle: needle.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, needle: &str) -> Self {
        Self {
            name: name.to_string(),
            needle: needle.to_string(),
            required: false,
        }
    }
}

/// Column positions discovered once per run from the header row.
#[derive(Debug, Clone, Default)]
pub struct RowSchema {
    columns: BTreeMap<String, usize>,
}

impl RowSchema {
    /// A header equal to the needle (normalized) wins over one that merely
    /// contains it. Ties go to the leftmost column.
    pub fn sniff(headers: &[String], specs: &[FieldSpec]) -> Result<Self, ReconError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_label(h)).collect();
        let mut columns = BTreeMap::new();

        for spec in specs {
            let needle = normalize_label(&spec.needle);
            let exact = normalized.iter().position(|h| !needle.is_empty() && *h == needle);
            let found = exact.or_else(|| {
                normalized
                    .iter()
                    .position(|h| !needle.is_empty() && h.contains(&needle))
            });

            match found {
                Some(index) => {
                    columns.insert(spec.name.clone(), index);
                }
                None if spec.required => {
                    return Err(ReconError::MissingColumn {
                        field: spec.name.clone(),
                        needle: spec.needle.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(Self { columns })
    }

    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn has(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Cell for `field`; `None` when the field was not discovered or the row
    /// is shorter than the column.
    pub fn get<'r>(&self, row: &'r InputRow, field: &str) -> Option<&'r str> {
        self.column(field).and_then(|index| row.cell(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn substring_header_search() {
        let schema = RowSchema::sniff(
            &headers(&["Swimmer", "Primary Parent Name (billing)", "Notes"]),
            &[FieldSpec::required(LABEL_FIELD, "Parent Name")],
        )
        .unwrap();
        assert_eq!(schema.column(LABEL_FIELD), Some(1));
    }

    #[test]
    fn exact_header_beats_earlier_substring() {
        let schema = RowSchema::sniff(
            &headers(&["Swimmer Level Notes", "level"]),
            &[FieldSpec::required("level", "Level")],
        )
        .unwrap();
        assert_eq!(schema.column("level"), Some(1));
    }

    #[test]
    fn missing_required_column() {
        let err = RowSchema::sniff(
            &headers(&["Swimmer", "Email"]),
            &[FieldSpec::required(LABEL_FIELD, "Parent Name")],
        )
        .unwrap_err();
        assert!(matches!(err, ReconError::MissingColumn { .. }));
    }

    #[test]
    fn missing_optional_column_is_fine() {
        let schema = RowSchema::sniff(
            &headers(&["Parent Name"]),
            &[
                FieldSpec::required(LABEL_FIELD, "Parent Name"),
                FieldSpec::optional(CONTEXT_FIELD, "Level"),
            ],
        )
        .unwrap();
        assert!(!schema.has(CONTEXT_FIELD));
    }

    #[test]
    fn short_row_reads_as_missing() {
        let schema = RowSchema::sniff(
            &headers(&["id", "x", "Parent Name"]),
            &[FieldSpec::required(LABEL_FIELD, "parent name")],
        )
        .unwrap();
        let row = InputRow::new(2, headers(&["abc"]));
        assert_eq!(schema.get(&row, LABEL_FIELD), None);
        let row = InputRow::new(3, headers(&["abc", "", "Jane"]));
        assert_eq!(schema.get(&row, LABEL_FIELD), Some("Jane"));
    }
}
