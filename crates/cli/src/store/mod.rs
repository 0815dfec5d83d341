//! Backends for `lsync`: the REST API, or a JSON snapshot for offline runs.

pub mod rest;

use std::fs;
use std::path::Path;

use lessonsync_config::{credentials, Settings};
use lessonsync_recon::MemoryStore;

use crate::exit_codes;
use crate::CliError;

pub use rest::{RestClient, RestProgressStore, RestTargetStore};

/// Resolve credentials, build the client and check that `table` answers.
pub fn connect(settings: &Settings, table: &str) -> Result<RestClient, CliError> {
    let creds = credentials::resolve(&settings.backend, &settings.base_dir())?;
    let client = RestClient::from_settings(&creds, &settings.backend)?;
    log::info!("connecting to {}", client.base_url());
    client.ping(table)?;
    Ok(client)
}

/// In-memory store seeded from a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<MemoryStore, CliError> {
    let contents = fs::read_to_string(path).map_err(|e| CliError {
        code: exit_codes::EXIT_IO,
        message: format!("cannot read snapshot {}: {e}", path.display()),
        hint: None,
    })?;
    let store = MemoryStore::from_snapshot_json(&contents).map_err(|e| CliError {
        code: exit_codes::EXIT_USAGE,
        message: format!("{}: {e}", path.display()),
        hint: Some(
            "a snapshot holds `records`, `references`, `swimmers`, `progress`, \
             `targets` and `strategies` arrays"
                .into(),
        ),
    })?;
    log::info!("using snapshot {}", path.display());
    Ok(store)
}

/// Write the store back to its snapshot file.
pub fn save_snapshot(path: &Path, store: &MemoryStore) -> Result<(), CliError> {
    let json = store.to_snapshot_json().map_err(|e| CliError {
        code: exit_codes::EXIT_ERROR,
        message: e.to_string(),
        hint: None,
    })?;
    fs::write(path, json).map_err(|e| CliError {
        code: exit_codes::EXIT_IO,
        message: format!("cannot write snapshot {}: {e}", path.display()),
        hint: None,
    })?;
    log::info!("updated snapshot {}", path.display());
    Ok(())
}
