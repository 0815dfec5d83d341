use std::fmt;

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (empty eligible state, zero batch size, etc.).
    ConfigValidation(String),
    /// Identifier shape is not a usable pattern.
    InvalidShape { pattern: String, message: String },
    /// Alias data could not be parsed, or two keys collide after folding.
    AliasParse(String),
    /// A required column was not found by header search.
    MissingColumn { field: String, needle: String },
    /// Reading the row source failed. Fatal: the run stops here.
    SourceRead { row: usize, message: String },
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::InvalidShape { pattern, message } => {
                write!(f, "invalid identifier shape '{pattern}': {message}")
            }
            Self::AliasParse(msg) => write!(f, "alias table error: {msg}"),
            Self::MissingColumn { field, needle } => {
                write!(f, "no column for '{field}' (looked for a header containing '{needle}')")
            }
            Self::SourceRead { row, message } => {
                write!(f, "cannot read source at row {row}: {message}")
            }
        }
    }
}

impl std::error::Error for ReconError {}
