use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matcher::ReferenceEntry;
use crate::model::{Identifier, TargetRecord};
use crate::normalize::normalize_label;
use crate::progress::{SkillProgress, SwimmerStrategy, SwimmerTarget};

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

/// Backend holding the records being reconciled.
///
/// Calls are blocking and issued one at a time by the driver.
pub trait TargetStore {
    fn fetch(&mut self, id: &Identifier) -> Result<Option<TargetRecord>, StoreError>;

    /// Set the reconciled field of `id`, guarded on the record still being in
    /// `expected_state`. Returns the updated record when the backend reports it.
    fn update(
        &mut self,
        id: &Identifier,
        value: &str,
        expected_state: &str,
    ) -> Result<Option<TargetRecord>, StoreError>;

    /// Canonical reference entries of one context (empty context: all).
    fn references(&mut self, context: &str) -> Result<Vec<ReferenceEntry>, StoreError>;
}

/// Backend side of the skill-progress import.
pub trait ProgressStore {
    /// Swimmers as reference entries: id plus full display name.
    fn swimmers(&mut self) -> Result<Vec<ReferenceEntry>, StoreError>;

    /// Skills with their level name as context.
    fn skills(&mut self) -> Result<Vec<ReferenceEntry>, StoreError>;

    /// (swimmer_id, skill_id) pairs already stored.
    fn existing_progress(&mut self) -> Result<HashSet<(String, String)>, StoreError>;

    /// Insert or merge one batch of progress records.
    fn upsert_progress(&mut self, records: &[SkillProgress]) -> Result<(), StoreError>;

    /// Insert or merge on (swimmer_id, target_name).
    fn upsert_targets(&mut self, records: &[SwimmerTarget]) -> Result<(), StoreError>;

    /// Insert or merge on (swimmer_id, strategy_name).
    fn upsert_strategies(&mut self, records: &[SwimmerStrategy]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Batched writes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteTally {
    pub written: usize,
    pub failed: usize,
    pub batches: usize,
    /// Batches that failed and were retried one record at a time.
    pub fallbacks: usize,
    pub errors: Vec<String>,
}

/// Write `records` in chunks of `batch_size`. A failed chunk is retried one
/// record at a time so a single bad record does not sink its neighbours.
pub fn write_batched<T, F>(records: &[T], batch_size: usize, mut write: F) -> WriteTally
where
    F: FnMut(&[T]) -> Result<(), StoreError>,
{
    let mut tally = WriteTally::default();
    for chunk in records.chunks(batch_size.max(1)) {
        tally.batches += 1;
        match write(chunk) {
            Ok(()) => tally.written += chunk.len(),
            Err(batch_err) => {
                log::warn!(
                    "batch {} of {} records failed ({batch_err}), retrying individually",
                    tally.batches,
                    chunk.len()
                );
                tally.fallbacks += 1;
                for record in chunk {
                    match write(std::slice::from_ref(record)) {
                        Ok(()) => tally.written += 1,
                        Err(e) => {
                            tally.failed += 1;
                            tally.errors.push(e.message);
                        }
                    }
                }
            }
        }
    }
    tally
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// JSON snapshot of backend data, used for offline runs and tests.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    records: Vec<TargetRecord>,
    #[serde(default)]
    references: Vec<ReferenceEntry>,
    #[serde(default)]
    swimmers: Vec<ReferenceEntry>,
    #[serde(default)]
    progress: Vec<SkillProgress>,
    #[serde(default)]
    targets: Vec<SwimmerTarget>,
    #[serde(default)]
    strategies: Vec<SwimmerStrategy>,
}

/// Store backed by in-process maps. Records are keyed by lower-cased id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, TargetRecord>,
    references: Vec<ReferenceEntry>,
    swimmers: Vec<ReferenceEntry>,
    progress: Vec<SkillProgress>,
    targets: Vec<SwimmerTarget>,
    strategies: Vec<SwimmerStrategy>,
    failing: HashSet<String>,
    fetch_calls: usize,
    updates: Vec<(String, String)>,
    upsert_batches: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot_json(input: &str) -> Result<Self, StoreError> {
        let snapshot: Snapshot = serde_json::from_str(input)
            .map_err(|e| StoreError::new(format!("invalid snapshot: {e}")))?;
        let mut store = Self::new();
        for record in snapshot.records {
            store.insert(record);
        }
        store.references = snapshot.references;
        store.swimmers = snapshot.swimmers;
        store.progress = snapshot.progress;
        store.targets = snapshot.targets;
        store.strategies = snapshot.strategies;
        Ok(store)
    }

    /// Current contents in snapshot form, records in id order.
    pub fn to_snapshot_json(&self) -> Result<String, StoreError> {
        let snapshot = Snapshot {
            records: self.records.values().cloned().collect(),
            references: self.references.clone(),
            swimmers: self.swimmers.clone(),
            progress: self.progress.clone(),
            targets: self.targets.clone(),
            strategies: self.strategies.clone(),
        };
        serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::new(format!("cannot serialize snapshot: {e}")))
    }

    pub fn insert(&mut self, record: TargetRecord) {
        self.records.insert(record.id.to_lowercase(), record);
    }

    pub fn add_reference(&mut self, entry: ReferenceEntry) {
        self.references.push(entry);
    }

    pub fn add_swimmer(&mut self, id: &str, name: &str) {
        self.swimmers.push(ReferenceEntry::new(id, name, None));
    }

    pub fn record(&self, id: &str) -> Option<&TargetRecord> {
        self.records.get(&id.to_lowercase())
    }

    pub fn records(&self) -> impl Iterator<Item = &TargetRecord> {
        self.records.values()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls
    }

    /// Every update call received, as (id, value), including failed ones.
    pub fn updates(&self) -> &[(String, String)] {
        &self.updates
    }

    pub fn progress(&self) -> &[SkillProgress] {
        &self.progress
    }

    pub fn targets(&self) -> &[SwimmerTarget] {
        &self.targets
    }

    pub fn strategies(&self) -> &[SwimmerStrategy] {
        &self.strategies
    }

    /// Upsert calls received across all three tables.
    pub fn upsert_batches(&self) -> usize {
        self.upsert_batches
    }

    /// Make every update of `id`, and every upsert for swimmer `id`, fail.
    pub fn fail_updates_for(&mut self, id: &str) {
        self.failing.insert(id.to_lowercase());
    }

    fn check_upsert<'r>(&mut self, swimmer_ids: impl IntoIterator<Item = &'r str>) -> Result<(), StoreError> {
        self.upsert_batches += 1;
        match swimmer_ids
            .into_iter()
            .find(|id| self.failing.contains(&id.to_lowercase()))
        {
            Some(bad) => Err(StoreError::new(format!("upsert rejected for swimmer {bad}"))),
            None => Ok(()),
        }
    }
}

/// Replace rows whose key matches, append the rest.
fn merge_keyed<T: Clone>(stored: &mut Vec<T>, records: &[T], key: impl Fn(&T) -> (String, String)) {
    let mut index: HashMap<(String, String), usize> =
        stored.iter().enumerate().map(|(i, r)| (key(r), i)).collect();
    for record in records {
        let k = key(record);
        match index.get(&k) {
            Some(&i) => stored[i] = record.clone(),
            None => {
                index.insert(k, stored.len());
                stored.push(record.clone());
            }
        }
    }
}

impl TargetStore for MemoryStore {
    fn fetch(&mut self, id: &Identifier) -> Result<Option<TargetRecord>, StoreError> {
        self.fetch_calls += 1;
        Ok(self.records.get(&id.key()).cloned())
    }

    fn update(
        &mut self,
        id: &Identifier,
        value: &str,
        expected_state: &str,
    ) -> Result<Option<TargetRecord>, StoreError> {
        self.updates.push((id.to_string(), value.to_string()));
        let key = id.key();
        if self.failing.contains(&key) {
            return Err(StoreError::new(format!("update of {id} rejected")));
        }
        let record = self
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::new(format!("no record {id}")))?;
        if record.state.as_deref() != Some(expected_state) {
            return Err(StoreError::new(format!(
                "record {id} is no longer in state '{expected_state}'"
            )));
        }
        record.value = Some(value.to_string());
        Ok(Some(record.clone()))
    }

    fn references(&mut self, context: &str) -> Result<Vec<ReferenceEntry>, StoreError> {
        let wanted = normalize_label(context);
        Ok(self
            .references
            .iter()
            .filter(|e| {
                wanted.is_empty() || normalize_label(e.context.as_deref().unwrap_or("")) == wanted
            })
            .cloned()
            .collect())
    }
}

impl ProgressStore for MemoryStore {
    fn swimmers(&mut self) -> Result<Vec<ReferenceEntry>, StoreError> {
        Ok(self.swimmers.clone())
    }

    fn skills(&mut self) -> Result<Vec<ReferenceEntry>, StoreError> {
        Ok(self.references.clone())
    }

    fn existing_progress(&mut self) -> Result<HashSet<(String, String)>, StoreError> {
        Ok(self
            .progress
            .iter()
            .map(|p| (p.swimmer_id.clone(), p.skill_id.clone()))
            .collect())
    }

    fn upsert_progress(&mut self, records: &[SkillProgress]) -> Result<(), StoreError> {
        self.check_upsert(records.iter().map(|r| r.swimmer_id.as_str()))?;
        merge_keyed(&mut self.progress, records, |r| {
            (r.swimmer_id.clone(), r.skill_id.clone())
        });
        Ok(())
    }

    fn upsert_targets(&mut self, records: &[SwimmerTarget]) -> Result<(), StoreError> {
        self.check_upsert(records.iter().map(|r| r.swimmer_id.as_str()))?;
        merge_keyed(&mut self.targets, records, |r| {
            (r.swimmer_id.clone(), r.target_name.clone())
        });
        Ok(())
    }

    fn upsert_strategies(&mut self, records: &[SwimmerStrategy]) -> Result<(), StoreError> {
        self.check_upsert(records.iter().map(|r| r.swimmer_id.as_str()))?;
        merge_keyed(&mut self.strategies, records, |r| {
            (r.swimmer_id.clone(), r.strategy_name.clone())
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
