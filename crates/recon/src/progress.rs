//! Skill-progress import planning.
//!
//! Turns parsed progress rows (from a CSV export or skill-tracker
//! workbooks) into records ready to upsert: swimmer and skill resolved to
//! ids, status mapped to the backend vocabulary, duplicates removed.
//!
//! Trackers also carry "I Can Swim Targets" and "Strategies Used" sections.
//! Those are free-text per swimmer, so only the swimmer is resolved and
//! duplicates are keyed on (swimmer, name).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::alias::AliasTable;
use crate::matcher::{ReferenceCatalog, ReferenceEntry, ReferenceMatcher};
use crate::normalize::{clean_label, normalize_label};

pub const DEFAULT_STATUS: &str = "not_started";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One parsed progress line before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRow {
    /// Source row (or workbook row) number, for reporting.
    pub row: usize,
    pub swimmer_id: Option<String>,
    pub swimmer_name: Option<String>,
    pub level: String,
    pub skill: String,
    /// Status as written in the source.
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub notes: Option<String>,
    pub is_safety_skill: bool,
}

/// A resolved progress record, shaped like a `swimmer_skills` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillProgress {
    pub swimmer_id: String,
    pub skill_id: String,
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub instructor_notes: Option<String>,
    #[serde(default)]
    pub is_safety_skill: bool,
}

/// One "I Can Swim Targets" line before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetRow {
    pub row: usize,
    pub swimmer_id: Option<String>,
    pub swimmer_name: Option<String>,
    pub target: String,
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// One "Strategies Used" line before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyRow {
    pub row: usize,
    pub swimmer_id: Option<String>,
    pub swimmer_name: Option<String>,
    pub strategy: String,
    pub is_used: bool,
    pub notes: Option<String>,
}

/// Shaped like a `swimmer_targets` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwimmerTarget {
    pub swimmer_id: String,
    pub target_name: String,
    pub status: String,
    pub date_started: Option<NaiveDate>,
    pub date_met: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Shaped like a `swimmer_strategies` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwimmerStrategy {
    pub swimmer_id: String,
    pub strategy_name: String,
    #[serde(default)]
    pub is_used: bool,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Status vocabulary
// ---------------------------------------------------------------------------

/// Source status label → backend status value. Unknown labels map to
/// [`DEFAULT_STATUS`].
#[derive(Debug, Clone)]
pub struct StatusMap {
    map: HashMap<String, String>,
}

impl Default for StatusMap {
    fn default() -> Self {
        let mut map = HashMap::new();
        for (label, value) in [
            ("Not Started", "not_started"),
            ("Emerging", "in_progress"),
            ("Met", "mastered"),
            ("not_started", "not_started"),
            ("in_progress", "in_progress"),
            ("mastered", "mastered"),
        ] {
            map.insert(normalize_label(label), value.to_string());
        }
        Self { map }
    }
}

impl StatusMap {
    /// Default vocabulary plus `overrides`, which win on conflict.
    pub fn with_overrides<'s>(overrides: impl IntoIterator<Item = (&'s String, &'s String)>) -> Self {
        let mut status_map = Self::default();
        for (label, value) in overrides {
            status_map
                .map
                .insert(normalize_label(label), value.trim().to_string());
        }
        status_map
    }

    pub fn map(&self, raw: &str) -> &str {
        self.map
            .get(&normalize_label(raw))
            .map(String::as_str)
            .unwrap_or(DEFAULT_STATUS)
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub rows: usize,
    pub prepared: usize,
    pub no_swimmer: usize,
    pub no_skill: usize,
    pub duplicates: usize,
    pub existing: usize,
    pub ambiguous: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressPlan {
    pub records: Vec<SkillProgress>,
    pub summary: ProgressSummary,
    /// Source skill label → canonical skill label, for every label that
    /// resolved to something spelled differently.
    pub variations: BTreeMap<String, String>,
    pub unresolved_swimmers: BTreeSet<String>,
    pub unresolved_skills: BTreeSet<String>,
}

/// Counts for a targets or strategies section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    pub rows: usize,
    pub prepared: usize,
    pub no_swimmer: usize,
    pub no_name: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionPlan<T> {
    pub records: Vec<T>,
    pub summary: SectionSummary,
    pub unresolved_swimmers: BTreeSet<String>,
}

impl<T> Default for SectionPlan<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            summary: SectionSummary::default(),
            unresolved_swimmers: BTreeSet::new(),
        }
    }
}

pub struct ProgressPlanner<'a> {
    matcher: ReferenceMatcher<'a>,
    swimmers_by_id: HashMap<String, String>,
    swimmers_by_name: HashMap<String, Vec<String>>,
    skills: ReferenceCatalog,
    statuses: &'a StatusMap,
    existing: HashSet<(String, String)>,
    skip_existing: bool,
}

impl<'a> ProgressPlanner<'a> {
    pub fn new(
        aliases: &'a AliasTable,
        swimmers: Vec<ReferenceEntry>,
        skills: Vec<ReferenceEntry>,
        statuses: &'a StatusMap,
    ) -> Self {
        let mut swimmers_by_id = HashMap::new();
        let mut swimmers_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for swimmer in swimmers {
            swimmers_by_name
                .entry(normalize_label(&swimmer.label))
                .or_default()
                .push(swimmer.id.clone());
            swimmers_by_id.insert(swimmer.id.to_lowercase(), swimmer.id);
        }
        Self {
            matcher: ReferenceMatcher::new(aliases),
            swimmers_by_id,
            swimmers_by_name,
            skills: ReferenceCatalog::from_entries(skills),
            statuses,
            existing: HashSet::new(),
            skip_existing: false,
        }
    }

    /// Skip (swimmer, skill) pairs that are already stored.
    pub fn skip_existing(mut self, existing: HashSet<(String, String)>) -> Self {
        self.existing = existing;
        self.skip_existing = true;
        self
    }

    pub fn plan<I>(&self, rows: I) -> ProgressPlan
    where
        I: IntoIterator<Item = ProgressRow>,
    {
        let mut plan = ProgressPlan::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for row in rows {
            plan.summary.rows += 1;

            let Some((swimmer_id, ambiguous)) =
                self.resolve_swimmer(row.swimmer_id.as_deref(), row.swimmer_name.as_deref())
            else {
                plan.summary.no_swimmer += 1;
                let who = swimmer_label(row.swimmer_id.as_deref(), row.swimmer_name.as_deref());
                log::debug!("row {}: no swimmer for '{who}'", row.row);
                plan.unresolved_swimmers.insert(who);
                continue;
            };
            if ambiguous {
                plan.summary.ambiguous += 1;
            }

            let Some(found) = self.matcher.resolve_in(&self.skills, &row.skill, &row.level) else {
                plan.summary.no_skill += 1;
                log::debug!("row {}: no skill '{}' in '{}'", row.row, row.skill, row.level);
                plan.unresolved_skills.insert(format!(
                    "{} / {}",
                    clean_label(&row.level),
                    clean_label(&row.skill)
                ));
                continue;
            };
            if found.is_ambiguous() {
                plan.summary.ambiguous += 1;
            }
            if normalize_label(&row.skill) != normalize_label(&found.label) {
                plan.variations
                    .insert(clean_label(&row.skill), found.label.clone());
            }

            let key = (swimmer_id.clone(), found.id.clone());
            if !seen.insert(key.clone()) {
                plan.summary.duplicates += 1;
                continue;
            }
            if self.skip_existing && self.existing.contains(&key) {
                plan.summary.existing += 1;
                continue;
            }

            plan.records.push(SkillProgress {
                swimmer_id,
                skill_id: found.id,
                status: self.statuses.map(&row.status).to_string(),
                date_started: row.date_started,
                date_met: row.date_met,
                instructor_notes: trimmed(row.notes.as_deref()),
                is_safety_skill: row.is_safety_skill,
            });
        }

        plan.summary.prepared = plan.records.len();
        plan
    }

    /// Targets keyed on (swimmer, target name); status uses the skill
    /// vocabulary.
    pub fn plan_targets<I>(&self, rows: I) -> SectionPlan<SwimmerTarget>
    where
        I: IntoIterator<Item = TargetRow>,
    {
        self.plan_section(rows, |swimmer_id, target_name, row: &TargetRow| SwimmerTarget {
            swimmer_id,
            target_name,
            status: self.statuses.map(&row.status).to_string(),
            date_started: row.date_started,
            date_met: row.date_met,
            notes: trimmed(row.notes.as_deref()),
        })
    }

    /// Strategies keyed on (swimmer, strategy name).
    pub fn plan_strategies<I>(&self, rows: I) -> SectionPlan<SwimmerStrategy>
    where
        I: IntoIterator<Item = StrategyRow>,
    {
        self.plan_section(rows, |swimmer_id, strategy_name, row: &StrategyRow| SwimmerStrategy {
            swimmer_id,
            strategy_name,
            is_used: row.is_used,
            notes: trimmed(row.notes.as_deref()),
        })
    }

    fn plan_section<R, T, I>(&self, rows: I, build: impl Fn(String, String, &R) -> T) -> SectionPlan<T>
    where
        R: SectionRow,
        I: IntoIterator<Item = R>,
    {
        let mut plan = SectionPlan::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for row in rows {
            plan.summary.rows += 1;

            let label = clean_label(row.name());
            if label.is_empty() {
                plan.summary.no_name += 1;
                continue;
            }
            let (id, name) = row.swimmer();
            let Some((swimmer_id, _)) = self.resolve_swimmer(id, name) else {
                plan.summary.no_swimmer += 1;
                let who = swimmer_label(id, name);
                log::debug!("row {}: no swimmer for '{who}'", row.number());
                plan.unresolved_swimmers.insert(who);
                continue;
            };
            if !seen.insert((swimmer_id.clone(), normalize_label(&label))) {
                plan.summary.duplicates += 1;
                continue;
            }
            plan.records.push(build(swimmer_id, label, &row));
        }

        plan.summary.prepared = plan.records.len();
        plan
    }

    /// Identifier first; otherwise exact full-name match. A name shared by
    /// several swimmers resolves to the first and is flagged ambiguous.
    fn resolve_swimmer(&self, id: Option<&str>, name: Option<&str>) -> Option<(String, bool)> {
        if let Some(id) = id.map(str::trim) {
            if let Some(found) = self.swimmers_by_id.get(&id.to_lowercase()) {
                return Some((found.clone(), false));
            }
        }
        let ids = self.swimmers_by_name.get(&normalize_label(name?))?;
        ids.first().map(|first| (first.clone(), ids.len() > 1))
    }
}

/// Per-swimmer free-text line: a targets or strategies row.
trait SectionRow {
    fn number(&self) -> usize;
    /// (identifier, full name)
    fn swimmer(&self) -> (Option<&str>, Option<&str>);
    fn name(&self) -> &str;
}

impl SectionRow for TargetRow {
    fn number(&self) -> usize {
        self.row
    }

    fn swimmer(&self) -> (Option<&str>, Option<&str>) {
        (self.swimmer_id.as_deref(), self.swimmer_name.as_deref())
    }

    fn name(&self) -> &str {
        &self.target
    }
}

impl SectionRow for StrategyRow {
    fn number(&self) -> usize {
        self.row
    }

    fn swimmer(&self) -> (Option<&str>, Option<&str>) {
        (self.swimmer_id.as_deref(), self.swimmer_name.as_deref())
    }

    fn name(&self) -> &str {
        &self.strategy
    }
}

fn swimmer_label(id: Option<&str>, name: Option<&str>) -> String {
    name.or(id).map(clean_label).unwrap_or_default()
}

fn trimmed(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
