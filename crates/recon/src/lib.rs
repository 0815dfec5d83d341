//! `lessonsync-recon` — row reconciliation engine.
//!
//! Pure engine crate: receives rows and a store collaborator, returns
//! classified per-row outcomes and a summary. No CLI, HTTP or file IO.

pub mod alias;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod identifier;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod progress;
pub mod schema;
pub mod sql;
pub mod store;
pub mod summary;

pub use alias::AliasTable;
pub use config::ReconConfig;
pub use engine::Reconciler;
pub use error::ReconError;
pub use model::{Identifier, InputRow, Outcome, ReconReport, RowOutcome, TargetRecord};
pub use store::{MemoryStore, StoreError, TargetStore};
