// Settings file
// Looked up as --config, ./lessonsync.toml, then ~/.config/lessonsync/lessonsync.toml

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lessonsync_recon::{AliasTable, ReconConfig};
use serde::Deserialize;

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "lessonsync.toml";
pub const DEFAULT_JOB: &str = "parent_names";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the REST backend lives and where its credentials come from.
/// Secrets never live in this file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    /// Base URL. When unset, read from `url_env`.
    pub url: Option<String>,
    pub url_env: String,
    pub key_env: String,
    /// Optional dotenv file consulted after the process environment.
    pub env_file: Option<PathBuf>,
    pub rest_path: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: None,
            url_env: "NEXT_PUBLIC_SUPABASE_URL".to_string(),
            key_env: "SUPABASE_SECRET_KEY".to_string(),
            env_file: Some(PathBuf::from(".env.local")),
            rest_path: "/rest/v1".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AliasSettings {
    /// TOML file with an `[aliases]` table, relative to the settings file.
    pub file: Option<PathBuf>,
}

/// A canonical reference table a label can be relinked to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceSettings {
    pub table: String,
    pub id_column: String,
    pub label_column: String,
    /// Column on `table` pointing at the context row (e.g. a level).
    pub context_column: Option<String>,
    pub context_table: String,
    /// Key of `context_table`, the value `context_column` holds.
    pub context_id_column: String,
    pub context_label_column: String,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            table: "skills".to_string(),
            id_column: "id".to_string(),
            label_column: "name".to_string(),
            context_column: Some("level_id".to_string()),
            context_table: "swim_levels".to_string(),
            context_id_column: "id".to_string(),
            context_label_column: "name".to_string(),
        }
    }
}

/// One reconciliation job: which table and field a source column repairs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    pub state_column: String,
    pub field: String,
    /// Columns joined with a space to name the record in reports.
    #[serde(default)]
    pub display_columns: Vec<String>,
    /// Header text locating the label column.
    pub label_header: String,
    /// Header text locating the context column (reference jobs).
    #[serde(default)]
    pub context_header: Option<String>,
    /// Overrides `[recon] mutable_state_value` for this job.
    #[serde(default)]
    pub eligible_state: Option<String>,
    /// When set, labels resolve to ids in this table.
    #[serde(default)]
    pub reference: Option<ReferenceSettings>,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl JobSettings {
    /// Built-in parent-name repair.
    pub fn parent_names() -> Self {
        Self {
            table: "swimmers".to_string(),
            id_column: "id".to_string(),
            state_column: "enrollment_status".to_string(),
            field: "parent_name".to_string(),
            display_columns: vec!["first_name".to_string(), "last_name".to_string()],
            label_header: "Parent Name".to_string(),
            context_header: None,
            eligible_state: None,
            reference: None,
        }
    }
}

/// Header text for each column of a skill-progress CSV.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgressColumns {
    pub swimmer_id: String,
    pub swimmer_name: String,
    pub level: String,
    pub skill: String,
    pub status: String,
    pub date_started: String,
    pub date_met: String,
    pub notes: String,
    pub safety: String,
}

impl Default for ProgressColumns {
    fn default() -> Self {
        Self {
            swimmer_id: "swimmer_id".to_string(),
            swimmer_name: "swimmer_name".to_string(),
            level: "level".to_string(),
            skill: "skill".to_string(),
            status: "status".to_string(),
            date_started: "date_started".to_string(),
            date_met: "date_met".to_string(),
            notes: "notes".to_string(),
            safety: "is_safety_skill".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkillImportSettings {
    pub swimmers_table: String,
    pub swimmer_name_columns: Vec<String>,
    pub skills: ReferenceSettings,
    pub progress_table: String,
    pub on_conflict: String,
    /// Tracker "I Can Swim Targets" rows.
    pub targets_table: String,
    pub target_conflict: String,
    /// Tracker "Strategies Used" rows.
    pub strategies_table: String,
    pub strategy_conflict: String,
    /// Records per upsert; `[recon] batch_size` when unset.
    pub batch_size: Option<usize>,
    pub skip_existing: bool,
    /// Extra source status → backend status mappings.
    pub statuses: BTreeMap<String, String>,
    pub columns: ProgressColumns,
}

impl Default for SkillImportSettings {
    fn default() -> Self {
        Self {
            swimmers_table: "swimmers".to_string(),
            swimmer_name_columns: vec!["first_name".to_string(), "last_name".to_string()],
            skills: ReferenceSettings::default(),
            progress_table: "swimmer_skills".to_string(),
            on_conflict: "swimmer_id,skill_id".to_string(),
            targets_table: "swimmer_targets".to_string(),
            target_conflict: "swimmer_id,target_name".to_string(),
            strategies_table: "swimmer_strategies".to_string(),
            strategy_conflict: "swimmer_id,strategy_name".to_string(),
            batch_size: None,
            skip_existing: false,
            statuses: BTreeMap::new(),
            columns: ProgressColumns::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub backend: BackendSettings,
    pub recon: ReconConfig,
    pub aliases: AliasSettings,
    pub jobs: BTreeMap<String, JobSettings>,
    pub skills: SkillImportSettings,
    /// File these settings came from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Candidate locations, in lookup order, when no path is given.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SETTINGS_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("lessonsync").join(SETTINGS_FILE));
        }
        paths
    }

    /// Load from `explicit`, or the first search path that exists, or
    /// fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::search_paths().into_iter().find(|p| p.is_file()),
        };

        let Some(path) = path else {
            log::debug!("no {SETTINGS_FILE} found, using defaults");
            let settings = Self::default();
            settings.validate()?;
            return Ok(settings);
        };

        log::debug!("loading settings from {}", path.display());
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let mut settings = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.clone(),
                message,
            },
            other => other,
        })?;
        settings.source = Some(path);
        Ok(settings)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(SETTINGS_FILE),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recon.validate()?;

        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Invalid("backend.timeout_secs must be at least 1".into()));
        }
        if self.skills.batch_size == Some(0) {
            return Err(ConfigError::Invalid("skills.batch_size must be at least 1".into()));
        }
        for (key, value) in [
            ("on_conflict", &self.skills.on_conflict),
            ("target_conflict", &self.skills.target_conflict),
            ("strategy_conflict", &self.skills.strategy_conflict),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("skills.{key} must not be empty")));
            }
        }

        for (name, job) in &self.jobs {
            for (key, value) in [
                ("table", &job.table),
                ("id_column", &job.id_column),
                ("state_column", &job.state_column),
                ("field", &job.field),
                ("label_header", &job.label_header),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("jobs.{name}.{key} must not be empty")));
                }
            }
            if job.eligible_state.as_deref().is_some_and(|s| s.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "jobs.{name}.eligible_state must not be empty"
                )));
            }
            if let Some(reference) = &job.reference {
                if reference.table.trim().is_empty() || reference.label_column.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "jobs.{name}.reference needs a table and a label_column"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Directory relative paths in the settings are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Every job name that can be run: configured ones plus the built-in.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        if !self.jobs.contains_key(DEFAULT_JOB) {
            names.push(DEFAULT_JOB.to_string());
            names.sort();
        }
        names
    }

    pub fn job(&self, name: &str) -> Result<JobSettings, ConfigError> {
        if let Some(job) = self.jobs.get(name) {
            return Ok(job.clone());
        }
        if name == DEFAULT_JOB {
            return Ok(JobSettings::parent_names());
        }
        Err(ConfigError::UnknownJob {
            name: name.to_string(),
            available: self.job_names(),
        })
    }

    /// Run config for `job`, with its eligible-state override applied.
    pub fn recon_for(&self, job: &JobSettings) -> ReconConfig {
        let mut config = self.recon.clone();
        if let Some(state) = &job.eligible_state {
            config.mutable_state_value = state.clone();
        }
        config
    }

    /// Records per progress upsert.
    pub fn progress_batch_size(&self) -> usize {
        self.skills.batch_size.unwrap_or(self.recon.batch_size)
    }

    /// Alias table from `[aliases] file`, or an empty table.
    pub fn alias_table(&self) -> Result<AliasTable, ConfigError> {
        let Some(file) = &self.aliases.file else {
            return Ok(AliasTable::new());
        };
        let path = self.resolve_path(file);
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let table = AliasTable::from_toml(&contents)?;
        log::debug!("loaded {} aliases from {}", table.len(), path.display());
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_is_all_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.backend.url_env, "NEXT_PUBLIC_SUPABASE_URL");
        assert_eq!(settings.backend.key_env, "SUPABASE_SECRET_KEY");
        assert_eq!(settings.recon.mutable_state_value, "pending_enrollment");
        assert_eq!(settings.skills.batch_size, None);
        assert_eq!(settings.progress_batch_size(), 100);
        assert_eq!(settings.skills.on_conflict, "swimmer_id,skill_id");
        assert_eq!(settings.skills.targets_table, "swimmer_targets");
        assert_eq!(settings.skills.target_conflict, "swimmer_id,target_name");
        assert_eq!(settings.skills.strategies_table, "swimmer_strategies");
        assert_eq!(settings.skills.strategy_conflict, "swimmer_id,strategy_name");
        assert_eq!(settings.skills.skills.context_id_column, "id");
        assert_eq!(settings.job_names(), vec!["parent_names"]);
    }

    #[test]
    fn built_in_job() {
        let settings = Settings::default();
        let job = settings.job("parent_names").unwrap();
        assert_eq!(job.table, "swimmers");
        assert_eq!(job.state_column, "enrollment_status");
        assert_eq!(job.field, "parent_name");
        assert_eq!(job.label_header, "Parent Name");
    }

    #[test]
    fn configured_job_and_override() {
        let settings = Settings::from_toml(
            r#"
[recon]
rate_limit_delay_ms = 0

[jobs.skill_links]
table = "swimmer_targets"
state_column = "status"
field = "skill_id"
label_header = "Skill"
context_header = "Level"
eligible_state = "open"

[jobs.skill_links.reference]
table = "skills"
"#,
        )
        .unwrap();

        let job = settings.job("skill_links").unwrap();
        assert_eq!(job.id_column, "id");
        let reference = job.reference.as_ref().unwrap();
        assert_eq!(reference.label_column, "name");
        assert_eq!(reference.context_table, "swim_levels");

        let config = settings.recon_for(&job);
        assert_eq!(config.mutable_state_value, "open");
        assert_eq!(config.rate_limit_delay_ms, 0);

        assert_eq!(settings.job_names(), vec!["parent_names", "skill_links"]);
    }

    #[test]
    fn unknown_job_lists_available() {
        let err = Settings::default().job("nope").unwrap_err();
        assert_eq!(err.to_string(), "unknown job 'nope' (available: parent_names)");
    }

    #[test]
    fn reject_unknown_keys() {
        let err = Settings::from_toml("[backend]\nsecret = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn reject_empty_job_field() {
        let err = Settings::from_toml("[skills]\ntarget_conflict = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("skills.target_conflict"));

        let err = Settings::from_toml(
            r#"
[jobs.bad]
table = "swimmers"
state_column = "enrollment_status"
field = ""
label_header = "Parent Name"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("jobs.bad.field"));
    }

    #[test]
    fn reject_bad_recon_section() {
        let err = Settings::from_toml("[recon]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Recon(_)));

        let err = Settings::from_toml("[skills]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("skills.batch_size"));
    }

    #[test]
    fn skills_batch_size_overrides_recon() {
        let settings = Settings::from_toml("[recon]\nbatch_size = 10\n\n[skills]\nbatch_size = 25\n").unwrap();
        assert_eq!(settings.progress_batch_size(), 25);
        let settings = Settings::from_toml("[recon]\nbatch_size = 10\n").unwrap();
        assert_eq!(settings.progress_batch_size(), 10);
    }

    #[test]
    fn load_explicit_missing_file() {
        let err = Settings::load(Some(Path::new("/nonexistent/lessonsync.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn load_resolves_alias_file_next_to_settings() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("aliases.toml"),
            "[aliases]\n\"Tread water for 10 seconds\" = \"Treading water 10 seconds\"\n",
        )
        .unwrap();
        let settings_path = dir.path().join(SETTINGS_FILE);
        fs::write(&settings_path, "[aliases]\nfile = \"aliases.toml\"\n").unwrap();

        let settings = Settings::load(Some(&settings_path)).unwrap();
        assert_eq!(settings.base_dir(), dir.path());
        let table = settings.alias_table().unwrap();
        assert_eq!(
            table.lookup("tread water for 10 seconds").unwrap().canonical,
            "Treading water 10 seconds"
        );
    }

    #[test]
    fn parse_error_names_file() {
        let dir = tempdir().unwrap();
        let settings_path = dir.path().join(SETTINGS_FILE);
        fs::write(&settings_path, "[recon\n").unwrap();
        let err = Settings::load(Some(&settings_path)).unwrap_err();
        assert!(err.to_string().contains(&settings_path.display().to_string()));
    }

    #[test]
    fn missing_alias_file_is_read_error() {
        let settings = Settings::from_toml("[aliases]\nfile = \"/nonexistent/aliases.toml\"\n").unwrap();
        assert!(matches!(settings.alias_table(), Err(ConfigError::Read { .. })));
    }
}
