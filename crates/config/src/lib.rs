// Configuration loading

pub mod credentials;
pub mod error;
pub mod settings;

pub use credentials::{CredentialSource, Credentials};
pub use error::ConfigError;
pub use settings::{
    BackendSettings, JobSettings, ReferenceSettings, Settings, SkillImportSettings, DEFAULT_JOB,
    SETTINGS_FILE,
};
