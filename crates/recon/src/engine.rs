use std::fmt;
use std::thread;

use crate::alias::AliasTable;
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::gate::{GateDecision, StatusGate};
use crate::identifier::IdentifierShape;
use crate::matcher::{ReferenceCatalog, ReferenceMatch, ReferenceMatcher};
use crate::model::{
    AppliedChange, Identifier, InputRow, Outcome, ReconMeta, ReconReport, RowOutcome,
    TargetRecord,
};
use crate::normalize::{clean_label, is_placeholder};
use crate::schema::{RowSchema, CONTEXT_FIELD, LABEL_FIELD};
use crate::store::TargetStore;
use crate::summary::Tally;

const PROGRESS_EVERY: usize = 500;

/// Drives rows through extract → fetch → gate → (resolve) → mutate.
///
/// One pass, one row at a time, at most one outstanding store call.
/// Per-row failures become [`Outcome::Error`]; only a row-source failure
/// aborts the run.
pub struct Reconciler<'a, S: TargetStore> {
    job: String,
    config: &'a ReconConfig,
    shape: IdentifierShape,
    gate: StatusGate,
    matcher: ReferenceMatcher<'a>,
    store: &'a mut S,
    resolve_references: bool,
    catalog: ReferenceCatalog,
}

impl<'a, S: TargetStore> Reconciler<'a, S> {
    pub fn new(
        job: &str,
        config: &'a ReconConfig,
        aliases: &'a AliasTable,
        store: &'a mut S,
    ) -> Result<Self, ReconError> {
        config.validate()?;
        Ok(Self {
            job: job.to_string(),
            config,
            shape: IdentifierShape::new(&config.identifier_shape)?,
            gate: StatusGate::new(&config.mutable_state_value),
            matcher: ReferenceMatcher::new(aliases),
            store,
            resolve_references: false,
            catalog: ReferenceCatalog::default(),
        })
    }

    /// When set, the row label is resolved to a reference id within the
    /// row's context and that id becomes the proposed value.
    pub fn resolve_references(mut self, enabled: bool) -> Self {
        self.resolve_references = enabled;
        self
    }

    pub fn run<I, E>(&mut self, schema: &RowSchema, rows: I) -> Result<ReconReport, ReconError>
    where
        I: IntoIterator<Item = Result<InputRow, E>>,
        E: fmt::Display,
    {
        let mut tally = Tally::new();
        let mut outcomes = Vec::new();
        let mut sample = Vec::new();
        let mut last_row = 0;

        for row in rows {
            let row = row.map_err(|e| ReconError::SourceRead {
                row: last_row + 1,
                message: e.to_string(),
            })?;
            last_row = row.number;

            let outcome = self.process_row(schema, &row);
            log::debug!(
                "row {}: {} ({})",
                outcome.row,
                outcome.outcome.kind(),
                outcome
                    .identifier
                    .as_ref()
                    .map(Identifier::as_str)
                    .unwrap_or("-")
            );

            if sample.len() < self.config.sample_size {
                if let Some(change) = AppliedChange::from_outcome(&outcome) {
                    sample.push(change);
                }
            }
            tally.record(&outcome);
            outcomes.push(outcome);

            if tally.rows() % PROGRESS_EVERY == 0 {
                log::info!("{}: {} rows processed", self.job, tally.rows());
            }
        }

        let summary = tally.finish();
        log::info!(
            "{}: {} rows, {} changed, {} skipped, {} errors",
            self.job,
            summary.rows,
            summary.changed(),
            summary.skipped(),
            summary.errors
        );

        Ok(ReconReport {
            meta: ReconMeta {
                job: self.job.clone(),
                eligible_state: self.gate.eligible_state().to_string(),
                dry_run: self.config.dry_run,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
            },
            summary,
            sample,
            outcomes,
        })
    }

    fn process_row(&mut self, schema: &RowSchema, row: &InputRow) -> RowOutcome {
        let mut result = RowOutcome {
            row: row.number,
            identifier: None,
            display_name: None,
            outcome: Outcome::SkippedNoIdentifier,
            reference: None,
        };

        let Some(id) = self.shape.extract(&row.cells) else {
            return result;
        };
        result.identifier = Some(id.clone());

        let label = schema
            .get(row, LABEL_FIELD)
            .map(clean_label)
            .unwrap_or_default();
        if is_placeholder(Some(label.as_str())) {
            result.outcome = Outcome::SkippedNoLabel;
            return result;
        }

        let record = match self.store.fetch(&id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                result.outcome = Outcome::SkippedNoMatch;
                return result;
            }
            Err(e) => {
                result.outcome = Outcome::Error {
                    reason: format!("lookup failed: {e}"),
                };
                return result;
            }
        };
        result.display_name = record.display_name.clone();

        // Reference ids are only known after resolution, so the gate sees
        // the state alone here and the full check runs in `apply`.
        let early = (!self.resolve_references).then_some(label.as_str());
        if let GateDecision::WrongState { state, would_change } = self.gate.check(&record, early) {
            result.outcome = Outcome::SkippedWrongState { state, would_change };
            return result;
        }

        let proposed = if self.resolve_references {
            let context = schema
                .get(row, CONTEXT_FIELD)
                .map(clean_label)
                .unwrap_or_default();
            match self.resolve(&label, &context) {
                Ok(Some(found)) => {
                    let id = found.id.clone();
                    result.reference = Some(found);
                    id
                }
                Ok(None) => {
                    result.outcome = Outcome::SkippedNoReference { label, context };
                    return result;
                }
                Err(reason) => {
                    result.outcome = Outcome::Error { reason };
                    return result;
                }
            }
        } else {
            label
        };

        result.outcome = self.apply(&id, &record, proposed);
        result
    }

    fn resolve(&mut self, label: &str, context: &str) -> Result<Option<ReferenceMatch>, String> {
        if !self.catalog.contains_context(context) {
            let entries = self
                .store
                .references(context)
                .map_err(|e| format!("reference lookup failed: {e}"))?;
            log::debug!("loaded {} reference entries for '{context}'", entries.len());
            self.catalog.insert_context(context, entries);
        }
        Ok(self.matcher.resolve_in(&self.catalog, label, context))
    }

    fn apply(&mut self, id: &Identifier, record: &TargetRecord, proposed: String) -> Outcome {
        match self.gate.check(record, Some(proposed.as_str())) {
            GateDecision::Allow => {}
            GateDecision::NoChange => return Outcome::SkippedNoChange,
            GateDecision::WrongState { state, would_change } => {
                return Outcome::SkippedWrongState { state, would_change };
            }
        }

        let old = record.value.clone();
        if self.config.dry_run {
            return Outcome::Planned { old, new: proposed };
        }

        let outcome = match self
            .store
            .update(id, &proposed, self.gate.eligible_state())
        {
            Ok(_) => Outcome::Applied { old, new: proposed },
            Err(e) => {
                log::warn!("update of {id} failed: {e}");
                Outcome::Error {
                    reason: format!("update failed: {e}"),
                }
            }
        };

        let delay = self.config.rate_limit_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use crate::store::MemoryStore;

    const ID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn config() -> ReconConfig {
        ReconConfig {
            rate_limit_delay_ms: 0,
            ..ReconConfig::default()
        }
    }

    fn schema() -> RowSchema {
        let headers = vec!["Swimmer ID".to_string(), "Parent Name".to_string()];
        RowSchema::sniff(&headers, &[FieldSpec::required(LABEL_FIELD, "Parent Name")]).unwrap()
    }

    fn rows(values: &[(&str, &str)]) -> Vec<Result<InputRow, String>> {
        values
            .iter()
            .enumerate()
            .map(|(i, (id, label))| Ok(InputRow::new(i + 2, vec![id.to_string(), label.to_string()])))
            .collect()
    }

    #[test]
    fn source_failure_aborts_with_row_number() {
        let config = config();
        let aliases = AliasTable::new();
        let mut store = MemoryStore::new();
        let mut reconciler = Reconciler::new("t", &config, &aliases, &mut store).unwrap();

        let mut input = rows(&[(ID, "A")]);
        input.push(Err("truncated file".to_string()));
        let err = reconciler.run(&schema(), input).unwrap_err();
        match err {
            ReconError::SourceRead { row, message } => {
                assert_eq!(row, 3);
                assert_eq!(message, "truncated file");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn placeholder_label_is_no_label() {
        let config = config();
        let aliases = AliasTable::new();
        let mut store = MemoryStore::new();
        let mut reconciler = Reconciler::new("t", &config, &aliases, &mut store).unwrap();

        let report = reconciler.run(&schema(), rows(&[(ID, "None"), (ID, " ")])).unwrap();
        assert_eq!(report.summary.no_label, 2);
        assert_eq!(store.fetch_calls(), 0);
    }

    #[test]
    fn gate_decides_before_any_write() {
        let config = config();
        let aliases = AliasTable::new();
        let closed = "11111111-1111-1111-1111-111111111111";
        let mut store = MemoryStore::new();
        store.insert(TargetRecord::new(closed, "enrolled", Some("Nobody")));
        store.insert(TargetRecord::new(ID, "pending_enrollment", Some("Jane Doe")));
        let mut reconciler = Reconciler::new("t", &config, &aliases, &mut store).unwrap();

        let report = reconciler
            .run(&schema(), rows(&[(closed, "John Smith"), (ID, "  JANE   doe")]))
            .unwrap();
        assert_eq!(
            report.outcomes[0].outcome,
            Outcome::SkippedWrongState {
                state: Some("enrolled".into()),
                would_change: Some(true),
            }
        );
        assert_eq!(report.outcomes[1].outcome, Outcome::SkippedNoChange);
        assert!(store.updates().is_empty());
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let config = ReconConfig {
            dry_run: true,
            ..config()
        };
        let aliases = AliasTable::new();
        let mut store = MemoryStore::new();
        store.insert(TargetRecord::new(ID, "pending_enrollment", Some("Nobody")));
        let mut reconciler = Reconciler::new("t", &config, &aliases, &mut store).unwrap();

        let report = reconciler.run(&schema(), rows(&[(ID, "John Smith")])).unwrap();
        assert_eq!(
            report.outcomes[0].outcome,
            Outcome::Planned {
                old: Some("Nobody".into()),
                new: "John Smith".into()
            }
        );
        assert!(report.meta.dry_run);
        assert_eq!(report.sample.len(), 1);
        assert!(store.updates().is_empty());
    }

    #[test]
    fn sample_is_bounded() {
        let config = ReconConfig {
            sample_size: 2,
            ..config()
        };
        let aliases = AliasTable::new();
        let mut store = MemoryStore::new();
        let ids = [
            "11111111-1111-1111-1111-111111111111",
            "22222222-2222-2222-2222-222222222222",
            "33333333-3333-3333-3333-333333333333",
        ];
        for id in ids {
            store.insert(TargetRecord::new(id, "pending_enrollment", None));
        }
        let mut reconciler = Reconciler::new("t", &config, &aliases, &mut store).unwrap();
        let input = rows(&[(ids[0], "A"), (ids[1], "B"), (ids[2], "C")]);
        let report = reconciler.run(&schema(), input).unwrap();
        assert_eq!(report.summary.applied, 3);
        assert_eq!(report.sample.len(), 2);
        assert_eq!(report.changes().len(), 3);
    }
}
