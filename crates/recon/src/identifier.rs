use regex::Regex;

use crate::error::ReconError;
use crate::model::Identifier;

/// 8-4-4-4-12 hex, the shape of a UUID. Matched case-insensitively.
pub const UUID_SHAPE: &str =
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";

/// Compiled identifier shape. A cell matches only if its whole trimmed
/// value matches the pattern.
#[derive(Debug, Clone)]
pub struct IdentifierShape {
    pattern: String,
    regex: Regex,
}

impl IdentifierShape {
    pub fn new(pattern: &str) -> Result<Self, ReconError> {
        if pattern.trim().is_empty() {
            return Err(ReconError::InvalidShape {
                pattern: pattern.to_string(),
                message: "pattern is empty".into(),
            });
        }
        let regex = Regex::new(&format!("^(?i:{pattern})$")).map_err(|e| {
            ReconError::InvalidShape {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, value: &str) -> bool {
        let value = value.trim();
        !value.is_empty() && self.regex.is_match(value)
    }

    /// First cell of `cells` whose trimmed value has the identifier shape.
    pub fn extract(&self, cells: &[String]) -> Option<Identifier> {
        cells
            .iter()
            .map(|cell| cell.trim())
            .find(|cell| self.matches(cell))
            .map(Identifier::new)
    }
}
