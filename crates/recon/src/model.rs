use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matcher::ReferenceMatch;
use crate::summary::ReconSummary;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One source row: raw text cells plus its 1-based line number in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    pub number: usize,
    pub cells: Vec<String>,
}

impl InputRow {
    pub fn new(number: usize, cells: Vec<String>) -> Self {
        Self { number, cells }
    }

    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }
}

/// Extracted record identifier, kept as written in the source (trimmed).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used as a store key.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    /// Lifecycle state. Missing state never passes the gate.
    #[serde(default)]
    pub state: Option<String>,
    /// Current value of the field being reconciled.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl TargetRecord {
    pub fn new(id: impl Into<String>, state: &str, value: Option<&str>) -> Self {
        Self {
            id: id.into(),
            state: Some(state.to_string()),
            value: value.map(str::to_string),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        old: Option<String>,
        new: String,
    },
    Planned {
        old: Option<String>,
        new: String,
    },
    SkippedNoIdentifier,
    SkippedNoLabel,
    SkippedNoMatch,
    SkippedNoReference {
        label: String,
        context: String,
    },
    SkippedWrongState {
        state: Option<String>,
        /// Whether the field would have changed had the state allowed it.
        /// `None` when it cannot be known without resolving a reference.
        would_change: Option<bool>,
    },
    SkippedNoChange,
    Error {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Applied,
    Planned,
    SkippedNoIdentifier,
    SkippedNoLabel,
    SkippedNoMatch,
    SkippedNoReference,
    SkippedWrongState,
    SkippedNoChange,
    Error,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Applied { .. } => OutcomeKind::Applied,
            Outcome::Planned { .. } => OutcomeKind::Planned,
            Outcome::SkippedNoIdentifier => OutcomeKind::SkippedNoIdentifier,
            Outcome::SkippedNoLabel => OutcomeKind::SkippedNoLabel,
            Outcome::SkippedNoMatch => OutcomeKind::SkippedNoMatch,
            Outcome::SkippedNoReference { .. } => OutcomeKind::SkippedNoReference,
            Outcome::SkippedWrongState { .. } => OutcomeKind::SkippedWrongState,
            Outcome::SkippedNoChange => OutcomeKind::SkippedNoChange,
            Outcome::Error { .. } => OutcomeKind::Error,
        }
    }

    /// The (old, new) pair for outcomes that carry a change.
    pub fn change(&self) -> Option<(Option<&str>, &str)> {
        match self {
            Outcome::Applied { old, new } | Outcome::Planned { old, new } => {
                Some((old.as_deref(), new.as_str()))
            }
            _ => None,
        }
    }
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Applied => "applied",
            OutcomeKind::Planned => "planned",
            OutcomeKind::SkippedNoIdentifier => "skipped_no_identifier",
            OutcomeKind::SkippedNoLabel => "skipped_no_label",
            OutcomeKind::SkippedNoMatch => "skipped_no_match",
            OutcomeKind::SkippedNoReference => "skipped_no_reference",
            OutcomeKind::SkippedWrongState => "skipped_wrong_state",
            OutcomeKind::SkippedNoChange => "skipped_no_change",
            OutcomeKind::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceMatch>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A single applied or planned change, as kept in the report sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub row: usize,
    pub identifier: Identifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub old: Option<String>,
    pub new: String,
}

impl AppliedChange {
    pub fn from_outcome(outcome: &RowOutcome) -> Option<Self> {
        let (old, new) = outcome.outcome.change()?;
        let identifier = outcome.identifier.clone()?;
        Some(Self {
            row: outcome.row,
            identifier,
            display_name: outcome.display_name.clone(),
            old: old.map(str::to_string),
            new: new.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconMeta {
    pub job: String,
    pub eligible_state: String,
    pub dry_run: bool,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconReport {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    /// First N applied (or planned) changes.
    pub sample: Vec<AppliedChange>,
    pub outcomes: Vec<RowOutcome>,
}

impl ReconReport {
    /// Every applied or planned change, in row order.
    pub fn changes(&self) -> Vec<AppliedChange> {
        self.outcomes
            .iter()
            .filter_map(AppliedChange::from_outcome)
            .collect()
    }

    pub fn outcomes_of(&self, kind: OutcomeKind) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(move |o| o.outcome.kind() == kind)
    }

    /// Wrong-state rows grouped by observed state.
    pub fn wrong_state_rows(&self) -> BTreeMap<String, Vec<&RowOutcome>> {
        let mut grouped: BTreeMap<String, Vec<&RowOutcome>> = BTreeMap::new();
        for row in &self.outcomes {
            if let Outcome::SkippedWrongState { state, .. } = &row.outcome {
                let key = state.clone().unwrap_or_else(|| "(none)".to_string());
                grouped.entry(key).or_default().push(row);
            }
        }
        grouped
    }
}
