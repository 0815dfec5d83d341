use std::time::Duration;

use serde::Deserialize;

use crate::error::ReconError;
use crate::identifier::{IdentifierShape, UUID_SHAPE};

pub const DEFAULT_ELIGIBLE_STATE: &str = "pending_enrollment";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 100;
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

// ---------------------------------------------------------------------------
// Run config
// ---------------------------------------------------------------------------

/// Explicit run configuration handed to the [`Reconciler`](crate::Reconciler).
///
/// Every field has a default, so an empty `[recon]` table is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconConfig {
    /// Regex (unanchored source, matched against a whole trimmed cell,
    /// case-insensitive) describing what an identifier looks like.
    pub identifier_shape: String,
    /// The only lifecycle state whose records may be mutated.
    pub mutable_state_value: String,
    /// Records per write batch for bulk writers.
    pub batch_size: usize,
    /// Pause after each store mutation.
    pub rate_limit_delay_ms: u64,
    /// How many applied changes to keep in the report sample.
    pub sample_size: usize,
    /// Record `Planned` outcomes instead of writing.
    pub dry_run: bool,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            identifier_shape: UUID_SHAPE.to_string(),
            mutable_state_value: DEFAULT_ELIGIBLE_STATE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit_delay_ms: DEFAULT_RATE_LIMIT_DELAY_MS,
            sample_size: DEFAULT_SAMPLE_SIZE,
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        IdentifierShape::new(&self.identifier_shape)?;

        if self.mutable_state_value.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "mutable_state_value must not be empty".into(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ReconError::ConfigValidation(
                "batch_size must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_uses_defaults() {
        let config = ReconConfig::from_toml("").unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.mutable_state_value, "pending_enrollment");
        assert_eq!(config.rate_limit_delay(), Duration::from_millis(100));
    }

    #[test]
    fn parse_all_fields() {
        let input = r#"
identifier_shape = "[0-9]{6}"
mutable_state_value = "waitlist"
batch_size = 25
rate_limit_delay_ms = 0
sample_size = 5
dry_run = true
"#;
        let config = ReconConfig::from_toml(input).unwrap();
        assert_eq!(config.identifier_shape, "[0-9]{6}");
        assert_eq!(config.mutable_state_value, "waitlist");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.rate_limit_delay(), Duration::ZERO);
        assert_eq!(config.sample_size, 5);
        assert!(config.dry_run);
    }

    #[test]
    fn reject_unknown_field() {
        let err = ReconConfig::from_toml("mutable_state = \"x\"").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn reject_empty_state() {
        let err = ReconConfig::from_toml("mutable_state_value = \"  \"").unwrap_err();
        assert!(err.to_string().contains("mutable_state_value"));
    }

    #[test]
    fn reject_zero_batch() {
        let err = ReconConfig::from_toml("batch_size = 0").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn reject_bad_shape() {
        let err = ReconConfig::from_toml("identifier_shape = \"[0-9\"").unwrap_err();
        assert!(matches!(err, ReconError::InvalidShape { .. }));
    }
}
