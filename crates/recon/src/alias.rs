//! Alias table: noisy label → canonical label.
//!
//! Loaded once from TOML before a run:
//!
//! ```toml
//! [aliases]
//! "Tread water for 10 seconds" = "Treading water 10 seconds"
//! "Front float 5 sec" = "Front float 5 seconds"
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::normalize::{clean_label, normalize_label};

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
}

/// How an alias lookup succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasHit {
    pub canonical: String,
    /// True when only the case/whitespace-folded key matched.
    pub folded: bool,
}

#[derive(Deserialize)]
struct AliasFile {
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let file: AliasFile =
            toml::from_str(input).map_err(|e| ReconError::AliasParse(e.to_string()))?;
        Self::from_pairs(file.aliases)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ReconError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::new();
        for (key, value) in pairs {
            table.insert(key.into(), value.into())?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, key: String, canonical: String) -> Result<(), ReconError> {
        let folded_key = normalize_label(&key);
        if folded_key.is_empty() {
            return Err(ReconError::AliasParse("alias key is empty".into()));
        }
        let canonical = clean_label(&canonical);
        if canonical.is_empty() {
            return Err(ReconError::AliasParse(format!(
                "alias '{key}' maps to an empty label"
            )));
        }
        if let Some(existing) = self.folded.get(&folded_key) {
            if existing != &canonical {
                return Err(ReconError::AliasParse(format!(
                    "alias '{key}' collides with another key mapping to '{existing}'"
                )));
            }
        }
        self.folded.insert(folded_key, canonical.clone());
        self.exact.insert(key, canonical);
        Ok(())
    }

    /// Exact key first, then the folded key.
    pub fn lookup(&self, label: &str) -> Option<AliasHit> {
        if let Some(canonical) = self.exact.get(label) {
            return Some(AliasHit {
                canonical: canonical.clone(),
                folded: false,
            });
        }
        self.folded.get(&normalize_label(label)).map(|canonical| AliasHit {
            canonical: canonical.clone(),
            folded: true,
        })
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}
