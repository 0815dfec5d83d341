//! Report output shared by `run`, `audit` and `import-skills`.
//!
//! JSON goes to stdout (`--json`) and/or a file (`--output`); the human
//! summary always goes to stderr.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lessonsync_recon::model::{AppliedChange, OutcomeKind};
use lessonsync_recon::normalize::is_placeholder;
use lessonsync_recon::sql::{render_update_sql, SqlTarget};
use lessonsync_recon::{Outcome, ReconReport};
use serde::Serialize;

use crate::exit_codes;
use crate::CliError;

pub fn io_err(msg: impl Into<String>) -> CliError {
    CliError::io(msg)
}

/// Serialize `value` and send it to stdout and/or `output`.
pub fn emit_json<T: Serialize>(value: &T, json: bool, output: Option<&Path>) -> Result<(), CliError> {
    if !json && output.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError {
            code: exit_codes::EXIT_ERROR,
            message: format!("JSON serialization error: {e}"),
            hint: None,
        })?;

    if let Some(path) = output {
        fs::write(path, &json_str)
            .map_err(|e| io_err(format!("cannot write {}: {e}", path.display())))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{json_str}");
    }
    Ok(())
}

/// Write guarded `UPDATE` statements for every change in the report.
pub fn write_sql(path: &Path, target: &SqlTarget, report: &ReconReport) -> Result<usize, CliError> {
    let changes = report.changes();
    let sql = render_update_sql(target, &changes, &report.meta.run_at);
    fs::write(path, sql).map_err(|e| io_err(format!("cannot write {}: {e}", path.display())))?;
    eprintln!("wrote {} statement(s) to {}", changes.len(), path.display());
    Ok(changes.len())
}

fn describe(change: &AppliedChange) -> String {
    let who = change
        .display_name
        .clone()
        .unwrap_or_else(|| change.identifier.to_string());
    let old = match change.old.as_deref() {
        Some(old) => format!("'{old}'"),
        None => "(empty)".to_string(),
    };
    format!("  row {}: {who}: {old} -> '{}'", change.row, change.new)
}

pub fn print_run_summary(report: &ReconReport) {
    let s = &report.summary;
    let verb = if report.meta.dry_run { "would change" } else { "changed" };
    eprintln!(
        "{}: {} rows: {} {verb}, {} skipped, {} errors",
        report.meta.job,
        s.rows,
        s.changed(),
        s.skipped(),
        s.errors,
    );
    eprintln!(
        "  skipped: {} no identifier, {} no label, {} no match, {} no reference, {} wrong state, {} unchanged",
        s.no_identifier, s.no_label, s.no_match, s.no_reference, s.wrong_state, s.no_change,
    );
    if !s.wrong_state_by_state.is_empty() {
        let states: Vec<String> = s
            .wrong_state_by_state
            .iter()
            .map(|(state, n)| format!("{state}: {n}"))
            .collect();
        eprintln!("  other states: {}", states.join(", "));
    }
    if s.ambiguous > 0 {
        eprintln!("  {} reference(s) resolved from an ambiguous match", s.ambiguous);
    }

    if !report.sample.is_empty() {
        eprintln!("sample:");
        for change in &report.sample {
            eprintln!("{}", describe(change));
        }
    }

    for row in report.outcomes_of(OutcomeKind::Error).take(10) {
        if let Outcome::Error { reason } = &row.outcome {
            eprintln!("  error at row {}: {reason}", row.row);
        }
    }
}

// ── Audit ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AuditMismatch {
    pub row: usize,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub current: Option<String>,
    pub source: String,
}

/// Read-only view over a dry-run report.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub job: String,
    pub eligible_state: String,
    pub rows: usize,
    /// Eligible records already holding the source value.
    pub matches: usize,
    /// Eligible records that a run would update.
    pub needs_update: usize,
    /// Of those, records whose current value is a placeholder.
    pub placeholders: usize,
    /// Records in other states whose value differs, by state.
    pub other_state_mismatches: BTreeMap<String, usize>,
    pub other_state_total: usize,
    pub no_match: usize,
    pub no_identifier: usize,
    pub errors: usize,
    /// First N records needing an update.
    pub listed: Vec<AuditMismatch>,
}

impl AuditReport {
    pub fn from_report(report: &ReconReport, list: usize) -> Self {
        let s = &report.summary;
        let mut audit = AuditReport {
            job: report.meta.job.clone(),
            eligible_state: report.meta.eligible_state.clone(),
            rows: s.rows,
            matches: s.no_change,
            needs_update: s.planned + s.applied,
            placeholders: 0,
            other_state_mismatches: BTreeMap::new(),
            other_state_total: s.wrong_state,
            no_match: s.no_match,
            no_identifier: s.no_identifier,
            errors: s.errors,
            listed: Vec::new(),
        };

        for row in &report.outcomes {
            match &row.outcome {
                Outcome::Planned { old, new } | Outcome::Applied { old, new } => {
                    if is_placeholder(old.as_deref()) {
                        audit.placeholders += 1;
                    }
                    if audit.listed.len() < list {
                        audit.listed.push(AuditMismatch {
                            row: row.row,
                            identifier: row
                                .identifier
                                .as_ref()
                                .map(|i| i.to_string())
                                .unwrap_or_default(),
                            display_name: row.display_name.clone(),
                            current: old.clone(),
                            source: new.clone(),
                        });
                    }
                }
                Outcome::SkippedWrongState {
                    state,
                    would_change: Some(true),
                } => {
                    let key = state.clone().unwrap_or_else(|| "(none)".to_string());
                    *audit.other_state_mismatches.entry(key).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        audit
    }

    pub fn print(&self) {
        eprintln!(
            "{}: audited {} rows against '{}'",
            self.job, self.rows, self.eligible_state
        );
        eprintln!("  {} already match", self.matches);
        eprintln!(
            "  {} need updating ({} currently empty or placeholder)",
            self.needs_update, self.placeholders
        );
        let other: usize = self.other_state_mismatches.values().sum();
        eprintln!(
            "  {} in other states ({} differ, left alone)",
            self.other_state_total, other
        );
        for (state, n) in &self.other_state_mismatches {
            eprintln!("    {state}: {n}");
        }
        if self.no_match + self.no_identifier + self.errors > 0 {
            eprintln!(
                "  {} not found, {} without identifier, {} errors",
                self.no_match, self.no_identifier, self.errors
            );
        }
        if !self.listed.is_empty() {
            eprintln!("first {} mismatch(es):", self.listed.len());
            for m in &self.listed {
                let who = m.display_name.as_deref().unwrap_or(&m.identifier);
                eprintln!(
                    "  row {}: {who}: '{}' -> '{}'",
                    m.row,
                    m.current.as_deref().unwrap_or(""),
                    m.source
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonsync_recon::model::ReconMeta;
    use lessonsync_recon::summary::compute_summary;
    use lessonsync_recon::{Identifier, RowOutcome};
    use tempfile::tempdir;

    fn row(n: usize, outcome: Outcome) -> RowOutcome {
        RowOutcome {
            row: n,
            identifier: Some(Identifier::new(format!("id-{n}"))),
            display_name: None,
            outcome,
            reference: None,
        }
    }

    fn report(outcomes: Vec<RowOutcome>) -> ReconReport {
        ReconReport {
            meta: ReconMeta {
                job: "parent_names".into(),
                eligible_state: "pending_enrollment".into(),
                dry_run: true,
                engine_version: "test".into(),
                run_at: "2026-01-01T00:00:00+00:00".into(),
            },
            summary: compute_summary(&outcomes),
            sample: Vec::new(),
            outcomes,
        }
    }

    fn planned(old: Option<&str>, new: &str) -> Outcome {
        Outcome::Planned {
            old: old.map(str::to_string),
            new: new.to_string(),
        }
    }

    #[test]
    fn test_audit_counts() {
        let r = report(vec![
            row(2, planned(None, "Jane Doe")),
            row(3, planned(Some("None"), "John Smith")),
            row(4, planned(Some("J Smith"), "John Smith")),
            row(5, Outcome::SkippedNoChange),
            row(
                6,
                Outcome::SkippedWrongState {
                    state: Some("enrolled".into()),
                    would_change: Some(true),
                },
            ),
            row(
                7,
                Outcome::SkippedWrongState {
                    state: Some("enrolled".into()),
                    would_change: Some(false),
                },
            ),
            row(
                8,
                Outcome::SkippedWrongState {
                    state: None,
                    would_change: Some(true),
                },
            ),
        ]);

        let audit = AuditReport::from_report(&r, 2);
        assert_eq!(audit.rows, 7);
        assert_eq!(audit.matches, 1);
        assert_eq!(audit.needs_update, 3);
        assert_eq!(audit.placeholders, 2);
        assert_eq!(audit.other_state_total, 3);
        assert_eq!(audit.other_state_mismatches.get("enrolled"), Some(&1));
        assert_eq!(audit.other_state_mismatches.get("(none)"), Some(&1));
        assert_eq!(audit.listed.len(), 2);
        assert_eq!(audit.listed[1].current.as_deref(), Some("None"));
    }

    #[test]
    fn test_write_sql_uses_all_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fix.sql");
        let r = report(vec![
            row(2, planned(None, "Jane Doe")),
            row(3, Outcome::SkippedNoChange),
            row(4, planned(Some("x"), "O'Brien")),
        ]);
        let target = SqlTarget {
            table: "swimmers".into(),
            id_column: "id".into(),
            state_column: "enrollment_status".into(),
            field: "parent_name".into(),
            eligible_state: "pending_enrollment".into(),
        };
        assert_eq!(write_sql(&path, &target, &r).unwrap(), 2);
        let sql = fs::read_to_string(&path).unwrap();
        assert!(sql.contains("WHERE id = 'id-4'"));
        assert!(sql.contains("'O''Brien'"));
    }

    #[test]
    fn test_emit_json_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let r = report(vec![row(2, planned(None, "Jane Doe"))]);
        emit_json(&r, false, Some(&path)).unwrap();
        let back: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["summary"]["planned"], 1);
        assert_eq!(back["outcomes"][0]["outcome"]["kind"], "planned");
    }
}
