use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Outcome, RowOutcome};

/// Aggregate counts per outcome kind. Counters only grow during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconSummary {
    pub rows: usize,
    pub applied: usize,
    pub planned: usize,
    pub no_identifier: usize,
    pub no_label: usize,
    pub no_match: usize,
    pub no_reference: usize,
    pub wrong_state: usize,
    pub no_change: usize,
    pub errors: usize,
    /// Rows whose reference resolved through an ambiguous substring match.
    pub ambiguous: usize,
    /// Wrong-state rows whose value differs from the source.
    pub wrong_state_mismatches: usize,
    pub wrong_state_by_state: BTreeMap<String, usize>,
    pub kind_counts: BTreeMap<String, usize>,
}

impl ReconSummary {
    /// Rows that were (or in a dry run, would be) changed.
    pub fn changed(&self) -> usize {
        self.applied + self.planned
    }

    pub fn skipped(&self) -> usize {
        self.no_identifier
            + self.no_label
            + self.no_match
            + self.no_reference
            + self.wrong_state
            + self.no_change
    }
}

/// Incremental counter fed one outcome at a time by the driver.
#[derive(Debug, Default)]
pub struct Tally {
    summary: ReconSummary,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row: &RowOutcome) {
        let s = &mut self.summary;
        s.rows += 1;
        *s.kind_counts
            .entry(row.outcome.kind().to_string())
            .or_insert(0) += 1;

        if row.reference.as_ref().is_some_and(|r| r.is_ambiguous()) {
            s.ambiguous += 1;
        }

        match &row.outcome {
            Outcome::Applied { .. } => s.applied += 1,
            Outcome::Planned { .. } => s.planned += 1,
            Outcome::SkippedNoIdentifier => s.no_identifier += 1,
            Outcome::SkippedNoLabel => s.no_label += 1,
            Outcome::SkippedNoMatch => s.no_match += 1,
            Outcome::SkippedNoReference { .. } => s.no_reference += 1,
            Outcome::SkippedWrongState {
                state,
                would_change,
            } => {
                s.wrong_state += 1;
                if *would_change == Some(true) {
                    s.wrong_state_mismatches += 1;
                }
                let key = state.clone().unwrap_or_else(|| "(none)".to_string());
                *s.wrong_state_by_state.entry(key).or_insert(0) += 1;
            }
            Outcome::SkippedNoChange => s.no_change += 1,
            Outcome::Error { .. } => s.errors += 1,
        }
    }

    pub fn rows(&self) -> usize {
        self.summary.rows
    }

    pub fn finish(self) -> ReconSummary {
        self.summary
    }
}

/// Compute summary statistics from per-row outcomes.
pub fn compute_summary(outcomes: &[RowOutcome]) -> ReconSummary {
    let mut tally = Tally::new();
    for row in outcomes {
        tally.record(row);
    }
    tally.finish()
}
