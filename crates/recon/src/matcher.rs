use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alias::{AliasHit, AliasTable};
use crate::normalize::{clean_label, normalize_label, normalize_opt};

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A canonical row a label can resolve to (e.g. a skill within a level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl ReferenceEntry {
    pub fn new(id: &str, label: &str, context: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            context: context.map(str::to_string),
        }
    }
}

/// Reference entries grouped by normalized context. Read-only once a run
/// starts resolving against it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    by_context: BTreeMap<String, Vec<ReferenceEntry>>,
    all: Vec<ReferenceEntry>,
}

impl ReferenceCatalog {
    pub fn from_entries(entries: Vec<ReferenceEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            let key = normalize_opt(entry.context.as_deref());
            catalog.by_context.entry(key).or_default().push(entry.clone());
            catalog.all.push(entry);
        }
        catalog
    }

    /// Register the entries of one context. An empty list is recorded too,
    /// so the context counts as loaded.
    pub fn insert_context(&mut self, context: &str, entries: Vec<ReferenceEntry>) {
        for entry in &entries {
            if !self.all.iter().any(|e| e.id == entry.id) {
                self.all.push(entry.clone());
            }
        }
        self.by_context
            .entry(normalize_label(context))
            .or_default()
            .extend(entries);
    }

    pub fn contains_context(&self, context: &str) -> bool {
        self.by_context.contains_key(&normalize_label(context))
    }

    /// Entries of `context`; an empty context means every entry.
    pub fn entries(&self, context: &str) -> &[ReferenceEntry] {
        let key = normalize_label(context);
        if key.is_empty() {
            return &self.all;
        }
        self.by_context.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all(&self) -> &[ReferenceEntry] {
        &self.all
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Match result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Exact,
    CaseInsensitive,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMatch {
    pub id: String,
    /// Canonical label of the chosen entry.
    pub label: String,
    pub stage: MatchStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<AliasHit>,
    /// Ids of the other substring candidates that were passed over.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alternatives: Vec<String>,
}

impl ReferenceMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.alternatives.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Resolves noisy labels to reference entries. Stage order is precedence:
/// alias rewrite, exact, case-insensitive, then bidirectional substring.
pub struct ReferenceMatcher<'a> {
    aliases: &'a AliasTable,
}

impl<'a> ReferenceMatcher<'a> {
    pub fn new(aliases: &'a AliasTable) -> Self {
        Self { aliases }
    }

    pub fn resolve(&self, label: &str, candidates: &[ReferenceEntry]) -> Option<ReferenceMatch> {
        let cleaned = clean_label(label);
        if cleaned.is_empty() {
            return None;
        }

        let alias = self.aliases.lookup(label);
        let wanted = alias
            .as_ref()
            .map(|hit| hit.canonical.clone())
            .unwrap_or(cleaned);
        let wanted_norm = normalize_label(&wanted);

        let found = |entry: &ReferenceEntry, stage: MatchStage| ReferenceMatch {
            id: entry.id.clone(),
            label: entry.label.clone(),
            stage,
            alias: alias.clone(),
            alternatives: Vec::new(),
        };

        if let Some(entry) = candidates.iter().find(|e| clean_label(&e.label) == wanted) {
            return Some(found(entry, MatchStage::Exact));
        }

        if let Some(entry) = candidates
            .iter()
            .find(|e| normalize_label(&e.label) == wanted_norm)
        {
            return Some(found(entry, MatchStage::CaseInsensitive));
        }

        let mut hits = candidates.iter().filter(|e| {
            let norm = normalize_label(&e.label);
            !norm.is_empty() && (norm.contains(&wanted_norm) || wanted_norm.contains(&norm))
        });
        let first = hits.next()?;
        let mut result = found(first, MatchStage::Substring);
        result.alternatives = hits.map(|e| e.id.clone()).collect();
        Some(result)
    }

    pub fn resolve_in(
        &self,
        catalog: &ReferenceCatalog,
        label: &str,
        context: &str,
    ) -> Option<ReferenceMatch> {
        self.resolve(label, catalog.entries(context))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
