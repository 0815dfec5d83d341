//! REST backend store (PostgREST-style API).
//!
//! `RestClient` owns retry, backoff and error classification. The two
//! stores on top of it map the reconciler's and the progress importer's
//! operations onto table requests:
//!
//! - fetch:     `GET /{table}?{id}=eq.{id}&limit=1`
//! - update:    `PATCH /{table}?{id}=eq.{id}&{state}=eq.{eligible}` with
//!   `Prefer: return=representation`; zero rows back means the guard failed.
//!   Sent once: a failed PATCH is never retried
//! - references: levels from the context table, then entries filtered with
//!   `{context_column}=in.(…)`
//! - upsert:    `POST /{progress|targets|strategies}?on_conflict=…` with
//!   `Prefer: resolution=merge-duplicates`
//!
//! Listing requests page with `limit`/`offset`.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use lessonsync_config::{BackendSettings, Credentials, JobSettings, ReferenceSettings, SkillImportSettings};
use lessonsync_recon::matcher::ReferenceEntry;
use lessonsync_recon::normalize::normalize_label;
use lessonsync_recon::progress::{SkillProgress, SwimmerStrategy, SwimmerTarget};
use lessonsync_recon::store::{ProgressStore, StoreError, TargetStore};
use lessonsync_recon::{Identifier, TargetRecord};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::exit_codes;
use crate::CliError;

// ── Constants ───────────────────────────────────────────────────────

const USER_AGENT: &str = concat!("lsync/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 1000;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

// ── RestClient ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    /// First retry wait; doubles on every further attempt.
    pub initial_backoff: Duration,
    pub page_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: INITIAL_BACKOFF,
            page_size: PAGE_SIZE,
        }
    }
}

/// Blocking HTTP client with service-key auth, retry and backoff.
pub struct RestClient {
    http: Client,
    base_url: String,
    key: String,
    options: ClientOptions,
}

impl RestClient {
    pub fn new(base_url: &str, key: &str, options: ClientOptions) -> Result<Self, CliError> {
        let parsed = url::Url::parse(base_url).map_err(|e| CliError {
            code: exit_codes::EXIT_CONFIG,
            message: format!("invalid backend URL '{base_url}': {e}"),
            hint: None,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CliError {
                code: exit_codes::EXIT_CONFIG,
                message: format!("backend URL must be http(s): {base_url}"),
                hint: None,
            });
        }

        let http = Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CliError {
                code: exit_codes::EXIT_ERROR,
                message: format!("failed to build HTTP client: {e}"),
                hint: None,
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            options,
        })
    }

    pub fn from_settings(creds: &Credentials, backend: &BackendSettings) -> Result<Self, CliError> {
        let base = format!(
            "{}/{}",
            creds.url.trim_end_matches('/'),
            backend.rest_path.trim_matches('/')
        );
        let options = ClientOptions {
            timeout: Duration::from_secs(backend.timeout_secs),
            max_retries: backend.max_retries,
            ..ClientOptions::default()
        };
        Self::new(&base, &creds.key, options)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Accept", "application/json")
    }

    /// Send with retry + exponential backoff and parse the JSON body.
    /// An empty success body reads as `Value::Null`.
    ///
    /// `build` is called once per attempt.
    pub fn send(&self, build: impl Fn(&Self) -> RequestBuilder) -> Result<Value, CliError> {
        self.send_attempts(build, self.options.max_retries)
    }

    /// Single attempt for non-idempotent writes. A failure is reported
    /// as-is; the caller decides whether the write happened.
    pub fn send_once(&self, build: impl Fn(&Self) -> RequestBuilder) -> Result<Value, CliError> {
        self.send_attempts(build, 0)
    }

    fn send_attempts(
        &self,
        build: impl Fn(&Self) -> RequestBuilder,
        max_retries: u32,
    ) -> Result<Value, CliError> {
        let mut backoff = self.options.initial_backoff;

        for attempt in 0..=max_retries {
            let result = build(self).send();

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    // Network / timeout: retry
                    if attempt == max_retries {
                        return Err(backend_error(
                            format!("backend unreachable after {} attempts: {e}", attempt + 1),
                            Some("check [backend] url and network access"),
                        ));
                    }
                    log::warn!("retry {}/{} in {:?} ({e})", attempt + 1, max_retries, backoff);
                    thread::sleep(backoff);
                    backoff *= 2;
                    continue;
                }
            };

            let status = resp.status().as_u16();

            if status == 401 || status == 403 {
                let msg = error_message(resp.text().unwrap_or_default(), status);
                return Err(backend_error(
                    format!("backend auth failed ({status}): {msg}"),
                    Some("check the service key"),
                ));
            }

            if (400..500).contains(&status) && status != 429 {
                let msg = error_message(resp.text().unwrap_or_default(), status);
                return Err(backend_error(
                    format!("backend request rejected ({status}): {msg}"),
                    None,
                ));
            }

            if status == 429 || status >= 500 {
                if attempt == max_retries {
                    let what = if status == 429 { "rate limited" } else { "upstream error" };
                    return Err(backend_error(
                        format!("backend {what} after {} attempts ({status})", attempt + 1),
                        None,
                    ));
                }

                let wait = if status == 429 {
                    resp.headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(backoff)
                } else {
                    backoff
                };
                log::warn!(
                    "retry {}/{} in {:?} (HTTP {status})",
                    attempt + 1,
                    max_retries,
                    wait
                );
                thread::sleep(wait);
                backoff *= 2;
                continue;
            }

            let text = resp.text().map_err(|e| {
                backend_error(format!("failed to read backend response: {e}"), None)
            })?;
            let trimmed = text.trim_start_matches('\u{feff}').trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(trimmed).map_err(|e| {
                backend_error(
                    format!(
                        "failed to parse backend JSON: {e} (body: {})",
                        truncate(trimmed, 200)
                    ),
                    None,
                )
            });
        }

        Err(backend_error("backend retries exhausted".to_string(), None))
    }

    /// Every row of `table` matching `filters`, following limit/offset pages.
    /// `order_by` is a comma-separated key; pages are only stable on a key.
    pub fn fetch_all(
        &self,
        table: &str,
        select: &str,
        order_by: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<Value>, CliError> {
        let order = order_by
            .split(',')
            .map(|column| format!("{}.asc", column.trim()))
            .collect::<Vec<_>>()
            .join(",");
        let page_size = self.options.page_size.max(1);
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = self.send(|c| {
                c.request(Method::GET, table)
                    .query(&[("select", select)])
                    .query(filters)
                    .query(&[
                        ("order", order.clone()),
                        ("limit", page_size.to_string()),
                        ("offset", offset.to_string()),
                    ])
            })?;
            let items = into_rows(page, table)?;
            let count = items.len();
            rows.extend(items);
            if count < page_size {
                break;
            }
            offset += count;
        }

        log::debug!("{table}: {} rows", rows.len());
        Ok(rows)
    }

    /// Cheap reachability and auth check against one table.
    pub fn ping(&self, table: &str) -> Result<(), CliError> {
        self.send(|c| {
            c.request(Method::GET, table)
                .query(&[("select", "*"), ("limit", "1")])
        })
        .map(|_| ())
    }
}

fn backend_error(message: String, hint: Option<&str>) -> CliError {
    CliError {
        code: exit_codes::EXIT_BACKEND,
        message,
        hint: hint.map(str::to_string),
    }
}

/// PostgREST error bodies carry `message` (and sometimes `hint`).
fn error_message(body: String, status: u16) -> String {
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => json
            .get("message")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}")),
        Err(_) if !body.trim().is_empty() => truncate(body.trim(), 200).to_string(),
        Err(_) => format!("HTTP {status}"),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn into_rows(value: Value, table: &str) -> Result<Vec<Value>, CliError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(backend_error(
            format!("expected a JSON array from {table}, got {}", truncate(&other.to_string(), 80)),
            None,
        )),
    }
}

/// Text form of a column value. Null and missing are `None`.
fn text(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn joined(row: &Value, columns: &[String]) -> Option<String> {
    let parts: Vec<String> = columns
        .iter()
        .filter_map(|c| text(row, c))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn select_list(columns: &[&str]) -> String {
    let mut seen = HashSet::new();
    columns
        .iter()
        .filter(|c| !c.is_empty() && seen.insert(**c))
        .copied()
        .collect::<Vec<_>>()
        .join(",")
}

fn store_error(err: CliError) -> StoreError {
    StoreError::new(err.message)
}

fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "")))
        .collect();
    format!("in.({})", quoted.join(","))
}

// ── Reference lookups (shared) ──────────────────────────────────────

/// Context id → context label (e.g. level id → "Yellow").
fn contexts(client: &RestClient, reference: &ReferenceSettings) -> Result<HashMap<String, String>, CliError> {
    let key = reference.context_id_column.as_str();
    let select = select_list(&[key, reference.context_label_column.as_str()]);
    let rows = client.fetch_all(&reference.context_table, &select, key, &[])?;
    Ok(rows
        .iter()
        .filter_map(|row| Some((text(row, key)?, text(row, &reference.context_label_column)?)))
        .collect())
}

/// Reference entries, optionally narrowed to one context label.
fn reference_entries(
    client: &RestClient,
    reference: &ReferenceSettings,
    context: Option<&str>,
) -> Result<Vec<ReferenceEntry>, CliError> {
    let Some(context_column) = reference.context_column.as_deref() else {
        let select = select_list(&[reference.id_column.as_str(), reference.label_column.as_str()]);
        let rows = client.fetch_all(&reference.table, &select, &reference.id_column, &[])?;
        return Ok(rows
            .iter()
            .filter_map(|row| {
                let id = text(row, &reference.id_column)?;
                let label = text(row, &reference.label_column)?;
                Some(ReferenceEntry::new(&id, &label, None))
            })
            .collect());
    };

    let names = contexts(client, reference)?;
    let mut filters = Vec::new();
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        let wanted = normalize_label(context);
        let ids: Vec<String> = names
            .iter()
            .filter(|(_, name)| normalize_label(name) == wanted)
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            log::debug!("no {} row named '{context}'", reference.context_table);
            return Ok(Vec::new());
        }
        filters.push((context_column.to_string(), in_list(&ids)));
    }

    let select = select_list(&[
        reference.id_column.as_str(),
        reference.label_column.as_str(),
        context_column,
    ]);
    let rows = client.fetch_all(&reference.table, &select, &reference.id_column, &filters)?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let id = text(row, &reference.id_column)?;
            let label = text(row, &reference.label_column)?;
            let context = text(row, context_column).and_then(|c| names.get(&c).cloned());
            Some(ReferenceEntry::new(&id, &label, context.as_deref()))
        })
        .collect())
}

// ── Target store ────────────────────────────────────────────────────

/// The reconciler's backend: one job's table.
pub struct RestTargetStore {
    client: RestClient,
    job: JobSettings,
}

impl RestTargetStore {
    pub fn new(client: RestClient, job: JobSettings) -> Self {
        Self { client, job }
    }

    fn select(&self) -> String {
        let mut columns = vec![
            self.job.id_column.as_str(),
            self.job.state_column.as_str(),
            self.job.field.as_str(),
        ];
        columns.extend(self.job.display_columns.iter().map(String::as_str));
        select_list(&columns)
    }

    fn record(&self, row: &Value) -> Option<TargetRecord> {
        Some(TargetRecord {
            id: text(row, &self.job.id_column)?,
            state: text(row, &self.job.state_column),
            value: text(row, &self.job.field),
            display_name: joined(row, &self.job.display_columns),
        })
    }
}

impl TargetStore for RestTargetStore {
    fn fetch(&mut self, id: &Identifier) -> Result<Option<TargetRecord>, StoreError> {
        let select = self.select();
        let body = self
            .client
            .send(|c| {
                c.request(Method::GET, &self.job.table).query(&[
                    ("select".to_string(), select.clone()),
                    (self.job.id_column.clone(), format!("eq.{id}")),
                    ("limit".to_string(), "1".to_string()),
                ])
            })
            .map_err(store_error)?;
        let rows = into_rows(body, &self.job.table).map_err(store_error)?;
        Ok(rows.first().and_then(|row| self.record(row)))
    }

    fn update(
        &mut self,
        id: &Identifier,
        value: &str,
        expected_state: &str,
    ) -> Result<Option<TargetRecord>, StoreError> {
        let mut patch = serde_json::Map::new();
        patch.insert(self.job.field.clone(), Value::String(value.to_string()));
        let patch = Value::Object(patch);

        let select = self.select();
        let body = self
            .client
            .send_once(|c| {
                c.request(Method::PATCH, &self.job.table)
                    .query(&[
                        (self.job.id_column.clone(), format!("eq.{id}")),
                        (self.job.state_column.clone(), format!("eq.{expected_state}")),
                        ("select".to_string(), select.clone()),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&patch)
            })
            .map_err(store_error)?;

        let rows = into_rows(body, &self.job.table).map_err(store_error)?;
        match rows.first() {
            Some(row) => Ok(self.record(row)),
            None => Err(StoreError::new(format!(
                "no row updated for {id} (not in state '{expected_state}')"
            ))),
        }
    }

    fn references(&mut self, context: &str) -> Result<Vec<ReferenceEntry>, StoreError> {
        let Some(reference) = &self.job.reference else {
            return Ok(Vec::new());
        };
        reference_entries(&self.client, reference, Some(context)).map_err(store_error)
    }
}

// ── Progress store ──────────────────────────────────────────────────

/// The skill-progress importer's backend.
pub struct RestProgressStore {
    client: RestClient,
    settings: SkillImportSettings,
}

impl RestProgressStore {
    pub fn new(client: RestClient, settings: SkillImportSettings) -> Self {
        Self { client, settings }
    }

    /// Merge-on-conflict insert; a repeated batch lands on the same rows.
    fn upsert<T: Serialize>(&self, table: &str, on_conflict: &str, records: &[T]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        self.client
            .send(|c| {
                c.request(Method::POST, table)
                    .query(&[("on_conflict", on_conflict)])
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(records)
            })
            .map(|_| ())
            .map_err(store_error)
    }
}

impl ProgressStore for RestProgressStore {
    fn swimmers(&mut self) -> Result<Vec<ReferenceEntry>, StoreError> {
        let mut columns = vec!["id"];
        columns.extend(self.settings.swimmer_name_columns.iter().map(String::as_str));
        let rows = self
            .client
            .fetch_all(&self.settings.swimmers_table, &select_list(&columns), "id", &[])
            .map_err(store_error)?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = text(row, "id")?;
                let name = joined(row, &self.settings.swimmer_name_columns)?;
                Some(ReferenceEntry::new(&id, &name, None))
            })
            .collect())
    }

    fn skills(&mut self) -> Result<Vec<ReferenceEntry>, StoreError> {
        reference_entries(&self.client, &self.settings.skills, None).map_err(store_error)
    }

    fn existing_progress(&mut self) -> Result<HashSet<(String, String)>, StoreError> {
        let rows = self
            .client
            .fetch_all(
                &self.settings.progress_table,
                "swimmer_id,skill_id",
                "swimmer_id,skill_id",
                &[],
            )
            .map_err(store_error)?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((text(row, "swimmer_id")?, text(row, "skill_id")?)))
            .collect())
    }

    fn upsert_progress(&mut self, records: &[SkillProgress]) -> Result<(), StoreError> {
        self.upsert(&self.settings.progress_table, &self.settings.on_conflict, records)
    }

    fn upsert_targets(&mut self, records: &[SwimmerTarget]) -> Result<(), StoreError> {
        self.upsert(&self.settings.targets_table, &self.settings.target_conflict, records)
    }

    fn upsert_strategies(&mut self, records: &[SwimmerStrategy]) -> Result<(), StoreError> {
        self.upsert(&self.settings.strategies_table, &self.settings.strategy_conflict, records)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const ID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn client(server: &MockServer) -> RestClient {
        let options = ClientOptions {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_backoff: Duration::ZERO,
            page_size: 2,
        };
        RestClient::new(&server.base_url(), "service-key", options).unwrap()
    }

    fn target_store(server: &MockServer) -> RestTargetStore {
        RestTargetStore::new(client(server), JobSettings::parent_names())
    }

    #[test]
    fn test_fetch_maps_columns() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/swimmers")
                .header("apikey", "service-key")
                .header("authorization", "Bearer service-key")
                .query_param("id", format!("eq.{ID}"))
                .query_param("select", "id,enrollment_status,parent_name,first_name,last_name");
            then.status(200).json_body(json!([{
                "id": ID,
                "enrollment_status": "pending_enrollment",
                "parent_name": null,
                "first_name": "Ava",
                "last_name": "Lee"
            }]));
        });

        let record = target_store(&server)
            .fetch(&Identifier::new(ID))
            .unwrap()
            .unwrap();
        mock.assert();
        assert_eq!(record.state.as_deref(), Some("pending_enrollment"));
        assert_eq!(record.value, None);
        assert_eq!(record.display_name.as_deref(), Some("Ava Lee"));
    }

    #[test]
    fn test_fetch_missing_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/swimmers");
            then.status(200).json_body(json!([]));
        });
        assert!(target_store(&server).fetch(&Identifier::new(ID)).unwrap().is_none());
    }

    #[test]
    fn test_update_is_state_guarded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/swimmers")
                .query_param("id", format!("eq.{ID}"))
                .query_param("enrollment_status", "eq.pending_enrollment")
                .header("prefer", "return=representation")
                .json_body(json!({ "parent_name": "Jane Doe" }));
            then.status(200).json_body(json!([{
                "id": ID,
                "enrollment_status": "pending_enrollment",
                "parent_name": "Jane Doe"
            }]));
        });

        let updated = target_store(&server)
            .update(&Identifier::new(ID), "Jane Doe", "pending_enrollment")
            .unwrap()
            .unwrap();
        mock.assert();
        assert_eq!(updated.value.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_update_with_no_rows_back_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PATCH).path("/swimmers");
            then.status(200).json_body(json!([]));
        });
        let err = target_store(&server)
            .update(&Identifier::new(ID), "Jane Doe", "pending_enrollment")
            .unwrap_err();
        assert!(err.message.contains("not in state 'pending_enrollment'"));
    }

    #[test]
    fn test_failed_update_is_not_resent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH).path("/swimmers");
            then.status(503);
        });
        let options = ClientOptions {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::ZERO,
            page_size: 2,
        };
        let client = RestClient::new(&server.base_url(), "service-key", options).unwrap();
        let mut store = RestTargetStore::new(client, JobSettings::parent_names());

        let err = store
            .update(&Identifier::new(ID), "Jane Doe", "pending_enrollment")
            .unwrap_err();
        assert!(err.message.contains("upstream error after 1 attempts (503)"));
        mock.assert_calls(1);
    }

    #[test]
    fn test_auth_failure_fails_fast() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/swimmers");
            then.status(401).json_body(json!({ "message": "Invalid API key" }));
        });
        let err = client(&server).ping("swimmers").unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_BACKEND);
        assert!(err.message.contains("backend auth failed (401): Invalid API key"));
        mock.assert_calls(1);
    }

    #[test]
    fn test_retry_on_503_exhausted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/swimmers");
            then.status(503);
        });
        let err = client(&server).ping("swimmers").unwrap_err();
        assert_eq!(err.code, exit_codes::EXIT_BACKEND);
        assert!(err.message.contains("upstream error after 3 attempts (503)"));
        mock.assert_calls(3);
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/swimmers");
            then.status(429).header("retry-after", "0");
        });
        let err = client(&server).ping("swimmers").unwrap_err();
        assert!(err.message.contains("rate limited"));
        mock.assert_calls(3);
    }

    #[test]
    fn test_fetch_all_pages() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/swimmers").query_param("offset", "0");
            then.status(200).json_body(json!([
                { "id": "s1", "first_name": "Ava", "last_name": "Lee" },
                { "id": "s2", "first_name": "Ben", "last_name": null }
            ]));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/swimmers").query_param("offset", "2");
            then.status(200).json_body(json!([
                { "id": "s3", "first_name": "Cy", "last_name": "Park" }
            ]));
        });

        let mut store = RestProgressStore::new(client(&server), SkillImportSettings::default());
        let swimmers = store.swimmers().unwrap();
        first.assert();
        second.assert();
        let labels: Vec<&str> = swimmers.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Ava Lee", "Ben", "Cy Park"]);
    }

    #[test]
    fn test_references_narrowed_to_context() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/swim_levels");
            then.status(200).json_body(json!([
                { "id": "L1", "name": "Yellow" },
                { "id": "L2", "name": "Green" }
            ]));
        });
        let skills = server.mock(|when, then| {
            when.method(GET)
                .path("/skills")
                .query_param("level_id", "in.(\"L1\")");
            then.status(200).json_body(json!([
                { "id": "k1", "name": "Treading water 10 seconds", "level_id": "L1" }
            ]));
        });

        let mut job = JobSettings::parent_names();
        job.reference = Some(ReferenceSettings::default());
        let mut store = RestTargetStore::new(client(&server), job);
        let entries = store.references("yellow").unwrap();
        skills.assert();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context.as_deref(), Some("Yellow"));
    }

    #[test]
    fn test_references_use_configured_key_columns() {
        let server = MockServer::start();
        let levels = server.mock(|when, then| {
            when.method(GET)
                .path("/swim_levels")
                .query_param("select", "level_key,name")
                .query_param("order", "level_key.asc");
            then.status(200).json_body(json!([{ "level_key": "L1", "name": "Yellow" }]));
        });
        let skills = server.mock(|when, then| {
            when.method(GET)
                .path("/skills")
                .query_param("select", "skill_id,name,level_id")
                .query_param("order", "skill_id.asc");
            then.status(200).json_body(json!([
                { "skill_id": "k7", "name": "Back float", "level_id": "L1" }
            ]));
        });

        let settings = SkillImportSettings {
            skills: ReferenceSettings {
                id_column: "skill_id".to_string(),
                context_id_column: "level_key".to_string(),
                ..ReferenceSettings::default()
            },
            ..SkillImportSettings::default()
        };
        let mut store = RestProgressStore::new(client(&server), settings);
        let entries = store.skills().unwrap();
        levels.assert();
        skills.assert();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "k7");
        assert_eq!(entries[0].context.as_deref(), Some("Yellow"));
    }

    #[test]
    fn test_unknown_context_is_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/swim_levels");
            then.status(200).json_body(json!([{ "id": "L1", "name": "Yellow" }]));
        });
        let mut job = JobSettings::parent_names();
        job.reference = Some(ReferenceSettings::default());
        let mut store = RestTargetStore::new(client(&server), job);
        assert!(store.references("Purple").unwrap().is_empty());
    }

    #[test]
    fn test_upsert_merges_on_conflict() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/swimmer_skills")
                .query_param("on_conflict", "swimmer_id,skill_id")
                .header("prefer", "resolution=merge-duplicates,return=minimal");
            then.status(201);
        });

        let mut store = RestProgressStore::new(client(&server), SkillImportSettings::default());
        let record = SkillProgress {
            swimmer_id: "s1".into(),
            skill_id: "k1".into(),
            status: "mastered".into(),
            date_started: None,
            date_met: None,
            instructor_notes: None,
            is_safety_skill: true,
        };
        store.upsert_progress(&[record]).unwrap();
        mock.assert();
    }

    #[test]
    fn test_targets_and_strategies_upsert_to_their_tables() {
        let server = MockServer::start();
        let targets = server.mock(|when, then| {
            when.method(POST)
                .path("/swimmer_targets")
                .query_param("on_conflict", "swimmer_id,target_name")
                .json_body(json!([{
                    "swimmer_id": "s1",
                    "target_name": "Swim across the pool",
                    "status": "in_progress",
                    "date_started": "2024-02-01",
                    "date_met": null,
                    "notes": null
                }]));
            then.status(201);
        });
        let strategies = server.mock(|when, then| {
            when.method(POST)
                .path("/swimmer_strategies")
                .query_param("on_conflict", "swimmer_id,strategy_name")
                .json_body(json!([{
                    "swimmer_id": "s1",
                    "strategy_name": "Visual schedule",
                    "is_used": true,
                    "notes": "before warm-up"
                }]));
            then.status(201);
        });

        let mut store = RestProgressStore::new(client(&server), SkillImportSettings::default());
        store
            .upsert_targets(&[SwimmerTarget {
                swimmer_id: "s1".into(),
                target_name: "Swim across the pool".into(),
                status: "in_progress".into(),
                date_started: chrono::NaiveDate::from_ymd_opt(2024, 2, 1),
                date_met: None,
                notes: None,
            }])
            .unwrap();
        store
            .upsert_strategies(&[SwimmerStrategy {
                swimmer_id: "s1".into(),
                strategy_name: "Visual schedule".into(),
                is_used: true,
                notes: Some("before warm-up".into()),
            }])
            .unwrap();
        store.upsert_targets(&[]).unwrap();
        targets.assert();
        strategies.assert();
    }

    #[test]
    fn test_rejected_upsert_carries_backend_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/swimmer_skills");
            then.status(409).json_body(json!({ "message": "violates foreign key constraint" }));
        });
        let mut store = RestProgressStore::new(client(&server), SkillImportSettings::default());
        let record = SkillProgress {
            swimmer_id: "s1".into(),
            skill_id: "missing".into(),
            status: "not_started".into(),
            date_started: None,
            date_met: None,
            instructor_notes: None,
            is_safety_skill: false,
        };
        let err = store.upsert_progress(&[record]).unwrap_err();
        assert!(err.message.contains("violates foreign key constraint"));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = RestClient::new("not a url", "k", ClientOptions::default()).err().unwrap();
        assert_eq!(err.code, exit_codes::EXIT_CONFIG);
    }
}
