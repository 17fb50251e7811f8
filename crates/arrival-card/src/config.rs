//! Configuration loading and resolution.
//!
//! Every field has a default, so an empty `{}` file (or no file at all) is a
//! valid configuration. Environment variables override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquisition::{millis, AcquisitionSettings};
use crate::automation::AutomationSettings;
use crate::protocol::client::RemoteSettings;
use crate::protocol::orchestrator::ReferencePolicy;
use crate::renderer::SurfaceOptions;

pub const CONFIG_ENV: &str = "ARRIVAL_CARD_CONFIG";
pub const BASE_URL_ENV: &str = "ARRIVAL_CARD_BASE_URL";
pub const CHROMIUM_ENV: &str = "ARRIVAL_CARD_CHROMIUM_PATH";
pub const DB_ENV: &str = "ARRIVAL_CARD_DB";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Challenge acquisition section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    #[serde(flatten)]
    pub settings: AcquisitionSettings,
    /// Overall time allowed for one acquisition.
    #[serde(rename = "budget_ms", with = "millis")]
    pub budget: Duration,
    pub surface: SurfaceOptions,
    pub chromium_path: Option<PathBuf>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            settings: AcquisitionSettings::default(),
            budget: Duration::from_secs(30),
            surface: SurfaceOptions::hidden(),
            chromium_path: None,
        }
    }
}

/// Taxonomy section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Replacement taxonomy asset; the bundled one is used when unset.
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub reference: ReferencePolicy,
}

/// Local persistence section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
    pub journal_path: Option<PathBuf>,
    /// Write one JSONL line per attempt.
    pub journal: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            journal_path: None,
            journal: true,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(crate::storage::default_path)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal_path.clone().unwrap_or_else(crate::audit::default_path)
    }
}

/// Full configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteSettings,
    pub acquisition: AcquisitionConfig,
    pub automation: AutomationSettings,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
    /// Budget for a whole hybrid attempt; three acquisition budgets when unset.
    pub attempt_budget_ms: Option<u64>,
}

impl Config {
    /// Resolve, read, override from the environment, and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ARRIVAL_CARD_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BASE_URL_ENV) {
            self.remote.base_url = url;
        }
        if let Some(path) = lookup(CHROMIUM_ENV) {
            self.acquisition.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(DB_ENV) {
            self.storage.db_path = Some(PathBuf::from(path));
        }
    }

    pub fn attempt_budget(&self) -> Duration {
        self.attempt_budget_ms
            .map(Duration::from_millis)
            .unwrap_or(self.acquisition.budget * 3)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.remote.base_url)
            .map_err(|e| ConfigError::Invalid(format!("remote.base_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "remote.base_url must be http(s), got {}",
                url.scheme()
            )));
        }
        let form = url::Url::parse(&self.automation.form_url)
            .map_err(|e| ConfigError::Invalid(format!("automation.form_url: {e}")))?;
        if !matches!(form.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "automation.form_url must be http(s)".to_string(),
            ));
        }

        let checks = [
            (self.acquisition.settings.poll_interval.is_zero(), "acquisition.poll_interval_ms"),
            (self.acquisition.settings.max_attempts == 0, "acquisition.max_attempts"),
            (self.acquisition.budget.is_zero(), "acquisition.budget_ms"),
            (self.remote.request_timeout.is_zero(), "remote.request_timeout_ms"),
            (self.remote.max_step_gap.is_zero(), "remote.max_step_gap_ms"),
            (self.automation.result_timeout.is_zero(), "automation.result_timeout_ms"),
            (self.attempt_budget().is_zero(), "attempt_budget_ms"),
        ];
        if let Some((_, name)) = checks.iter().find(|(zero, _)| *zero) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.attempt_budget() < self.acquisition.budget {
            return Err(ConfigError::Invalid(
                "attempt_budget_ms must not be shorter than acquisition.budget_ms".to_string(),
            ));
        }

        self.acquisition
            .surface
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("acquisition.surface: {e}")))?;
        Ok(())
    }
}

/// Resolve the config file path.
///
/// Order: explicit path, `ARRIVAL_CARD_CONFIG`, `./.arrival-card/config.json`,
/// `~/.arrival-card/config.json`. `None` means built-in defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(".arrival-card/config.json");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    let home_config = dirs::home_dir()?.join(".arrival-card").join("config.json");
    home_config.exists().then_some(home_config)
}
