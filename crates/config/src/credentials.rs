// Backend credentials
//
// Looked up in order:
// 1. [backend] url in the settings file (URL only)
// 2. Process environment
// 3. The dotenv file named by [backend] env_file
//
// The service key is never read from the settings file, and the dotenv file
// is parsed into a map rather than loaded into the process environment.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::error::ConfigError;
use crate::settings::BackendSettings;

/// Where a credential value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Settings,
    Environment,
    EnvFile,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Settings => "settings",
            CredentialSource::Environment => "environment",
            CredentialSource::EnvFile => "env file",
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub url: String,
    pub key: String,
    pub url_source: CredentialSource,
    pub key_source: CredentialSource,
}

// Keep the key out of debug output and logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .field("url_source", &self.url_source)
            .field("key_source", &self.key_source)
            .finish()
    }
}

/// Resolve against the real process environment. `base_dir` anchors a
/// relative `env_file`.
pub fn resolve(backend: &BackendSettings, base_dir: &Path) -> Result<Credentials, ConfigError> {
    let file_vars = match &backend.env_file {
        Some(file) => {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            load_env_file(&path)?
        }
        None => HashMap::new(),
    };
    resolve_with(backend, |name| env::var(name).ok(), &file_vars)
}

/// Resolve with an injected environment lookup.
pub fn resolve_with<F>(
    backend: &BackendSettings,
    process_env: F,
    file_vars: &HashMap<String, String>,
) -> Result<Credentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| -> Option<(String, CredentialSource)> {
        if let Some(value) = process_env(name).filter(|v| !v.trim().is_empty()) {
            return Some((value.trim().to_string(), CredentialSource::Environment));
        }
        file_vars
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (v.trim().to_string(), CredentialSource::EnvFile))
    };

    let (url, url_source) = match backend.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => (url.trim().to_string(), CredentialSource::Settings),
        None => lookup(&backend.url_env).ok_or_else(|| ConfigError::MissingCredential {
            var: backend.url_env.clone(),
        })?,
    };
    let (key, key_source) = lookup(&backend.key_env).ok_or_else(|| ConfigError::MissingCredential {
        var: backend.key_env.clone(),
    })?;

    log::debug!(
        "backend url from {}, key from {}",
        url_source.as_str(),
        key_source.as_str()
    );

    Ok(Credentials {
        url: url.trim_end_matches('/').to_string(),
        key,
        url_source,
        key_source,
    })
}

/// Parse a dotenv file into a map. A missing file is an empty map.
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.is_file() {
        log::debug!("env file {} not present", path.display());
        return Ok(HashMap::new());
    }
    let read_err = |message: String| ConfigError::Read {
        path: path.to_path_buf(),
        message,
    };
    let iter = dotenvy::from_path_iter(path).map_err(|e| read_err(e.to_string()))?;
    let mut vars = HashMap::new();
    for item in iter {
        let (name, value) = item.map_err(|e| read_err(e.to_string()))?;
        vars.insert(name, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn backend() -> BackendSettings {
        BackendSettings {
            env_file: None,
            ..BackendSettings::default()
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_process_env_wins_over_file() {
        let file = vars(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://file.example"),
            ("SUPABASE_SECRET_KEY", "file-key"),
        ]);
        let creds = resolve_with(
            &backend(),
            |name| (name == "SUPABASE_SECRET_KEY").then(|| "env-key".to_string()),
            &file,
        )
        .unwrap();
        assert_eq!(creds.key, "env-key");
        assert_eq!(creds.key_source, CredentialSource::Environment);
        assert_eq!(creds.url, "https://file.example");
        assert_eq!(creds.url_source, CredentialSource::EnvFile);
    }

    #[test]
    fn test_settings_url_and_trailing_slash() {
        let settings = BackendSettings {
            url: Some("https://db.example/".to_string()),
            ..backend()
        };
        let creds = resolve_with(
            &settings,
            |_| None,
            &vars(&[("SUPABASE_SECRET_KEY", "k")]),
        )
        .unwrap();
        assert_eq!(creds.url, "https://db.example");
        assert_eq!(creds.url_source, CredentialSource::Settings);
    }

    #[test]
    fn test_missing_key_names_variable() {
        let err = resolve_with(
            &backend(),
            |name| (name == "NEXT_PUBLIC_SUPABASE_URL").then(|| "https://db.example".to_string()),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "SUPABASE_SECRET_KEY is not set");
    }

    #[test]
    fn test_blank_values_are_missing() {
        let err = resolve_with(&backend(), |_| Some("  ".to_string()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }

    #[test]
    fn test_debug_redacts_key() {
        let creds = resolve_with(
            &backend(),
            |name| Some(format!("value-of-{name}")),
            &HashMap::new(),
        )
        .unwrap();
        let shown = format!("{creds:?}");
        assert!(!shown.contains("value-of-SUPABASE_SECRET_KEY"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_load_env_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env.local");
        fs::write(
            &path,
            "# local\nNEXT_PUBLIC_SUPABASE_URL=https://db.example\nSUPABASE_SECRET_KEY=\"quoted\"\n",
        )
        .unwrap();
        let loaded = load_env_file(&path).unwrap();
        assert_eq!(loaded["NEXT_PUBLIC_SUPABASE_URL"], "https://db.example");
        assert_eq!(loaded["SUPABASE_SECRET_KEY"], "quoted");

        assert!(load_env_file(&dir.path().join("missing")).unwrap().is_empty());
    }
}
