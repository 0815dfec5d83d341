use std::fmt;
use std::path::PathBuf;

use lessonsync_recon::ReconError;

#[derive(Debug)]
pub enum ConfigError {
    /// An explicitly requested settings file does not exist.
    NotFound(PathBuf),
    /// A settings, alias or env file could not be read.
    Read { path: PathBuf, message: String },
    /// TOML parse / deserialization error.
    Parse { path: PathBuf, message: String },
    /// Settings parsed but are not usable.
    Invalid(String),
    /// Job name is neither configured nor built in.
    UnknownJob { name: String, available: Vec<String> },
    /// A required credential is not set.
    MissingCredential { var: String },
    /// Engine-level config error (run config, alias table).
    Recon(ReconError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "settings file not found: {}", path.display()),
            Self::Read { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            Self::Parse { path, message } => write!(f, "invalid {}: {message}", path.display()),
            Self::Invalid(msg) => write!(f, "invalid settings: {msg}"),
            Self::UnknownJob { name, available } => {
                write!(f, "unknown job '{name}' (available: {})", available.join(", "))
            }
            Self::MissingCredential { var } => write!(f, "{var} is not set"),
            Self::Recon(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ReconError> for ConfigError {
    fn from(e: ReconError) -> Self {
        Self::Recon(e)
    }
}
