//! CLI Exit Code Registry
//!
//! Single source of truth for `lsync` exit codes. Scripts and schedulers
//! rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | General error (unspecified)                          |
//! | 2    | Usage error (bad args, unknown job, missing column)  |
//! | 3    | I/O error (cannot read input, cannot write output)   |
//! | 60   | Invalid settings or alias file                       |
//! | 61   | Backend credentials missing                          |
//! | 62   | Backend unreachable, auth rejected, or upstream error|
//! | 63   | Row source failed mid-run                            |
//! | 64   | Run finished but some rows failed                    |
//! | 65   | Audit found records that need updating               |

use lessonsync_config::ConfigError;
use lessonsync_recon::ReconError;

use crate::CliError;

// =============================================================================
// Universal (0-3)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unknown job, header not found.
pub const EXIT_USAGE: u8 = 2;

/// Input could not be read or output could not be written.
pub const EXIT_IO: u8 = 3;

// =============================================================================
// Reconciliation (60-69)
// =============================================================================

/// Settings or alias file unreadable or invalid.
pub const EXIT_CONFIG: u8 = 60;

/// Backend URL or service key not set.
pub const EXIT_NOT_AUTH: u8 = 61;

/// Backend unreachable, auth rejected, or upstream failure after retries.
pub const EXIT_BACKEND: u8 = 62;

/// Row source failed part-way through; the run was aborted.
pub const EXIT_SOURCE: u8 = 63;

/// Run completed, but at least one row ended in an error outcome.
pub const EXIT_ROW_ERRORS: u8 = 64;

/// Audit found eligible records whose value differs from the source.
pub const EXIT_AUDIT_MISMATCH: u8 = 65;

// =============================================================================
// Error mapping
// =============================================================================

pub fn config_exit_code(err: &ConfigError) -> u8 {
    match err {
        ConfigError::MissingCredential { .. } => EXIT_NOT_AUTH,
        ConfigError::UnknownJob { .. } => EXIT_USAGE,
        ConfigError::NotFound(_) => EXIT_USAGE,
        _ => EXIT_CONFIG,
    }
}

pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::SourceRead { .. } => EXIT_SOURCE,
        ReconError::MissingColumn { .. } => EXIT_USAGE,
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::InvalidShape { .. }
        | ReconError::AliasParse(_) => EXIT_CONFIG,
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::MissingCredential { var } => {
                Some(format!("export {var}=<value> or add it to the env file"))
            }
            ConfigError::NotFound(_) => Some("pass an existing file to --config".to_string()),
            _ => None,
        };
        CliError {
            code: config_exit_code(&err),
            message: err.to_string(),
            hint,
        }
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::MissingColumn { needle, .. } => Some(format!(
                "the input needs a header containing '{needle}'"
            )),
            _ => None,
        };
        CliError {
            code: recon_exit_code(&err),
            message: err.to_string(),
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_IO,
            EXIT_CONFIG,
            EXIT_NOT_AUTH,
            EXIT_BACKEND,
            EXIT_SOURCE,
            EXIT_ROW_ERRORS,
            EXIT_AUDIT_MISMATCH,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn test_config_error_mapping() {
        let missing = ConfigError::MissingCredential {
            var: "SUPABASE_SECRET_KEY".into(),
        };
        let err = CliError::from(missing);
        assert_eq!(err.code, EXIT_NOT_AUTH);
        assert!(err.hint.unwrap().contains("SUPABASE_SECRET_KEY"));

        assert_eq!(
            config_exit_code(&ConfigError::NotFound(PathBuf::from("x.toml"))),
            EXIT_USAGE
        );
        assert_eq!(config_exit_code(&ConfigError::Invalid("bad".into())), EXIT_CONFIG);
    }

    #[test]
    fn test_recon_error_mapping() {
        let err = ReconError::SourceRead {
            row: 7,
            message: "bad quote".into(),
        };
        assert_eq!(recon_exit_code(&err), EXIT_SOURCE);
        let err = ReconError::MissingColumn {
            field: "label".into(),
            needle: "Parent Name".into(),
        };
        assert_eq!(CliError::from(err).code, EXIT_USAGE);
    }
}
