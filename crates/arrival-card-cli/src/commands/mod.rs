//! Subcommand implementations.

pub mod doctor;
pub mod registry;
pub mod results;
pub mod submit;

use std::path::Path;

use anyhow::Context;
use arrival_card::{Config, FieldEncodingRegistry, Remediation, ResultStore, TravelerSubmissionRecord};

/// Where command output goes and in which shape.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `human` to print text.
    pub fn emit(&self, value: serde_json::Value, human: impl FnOnce()) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            human();
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Config::load(path).context("failed to load configuration")
}

pub fn open_store(config: &Config) -> anyhow::Result<ResultStore> {
    let path = config.storage.db_path();
    ResultStore::open(&path).with_context(|| format!("failed to open result store {}", path.display()))
}

pub fn load_registry(config: &Config) -> anyhow::Result<FieldEncodingRegistry> {
    let registry = match &config.registry.path {
        Some(path) => FieldEncodingRegistry::from_path(path)
            .with_context(|| format!("failed to load taxonomy {}", path.display()))?,
        None => FieldEncodingRegistry::bundled().context("bundled taxonomy is invalid")?,
    };
    Ok(registry)
}

pub fn read_record(path: &Path) -> anyhow::Result<TravelerSubmissionRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read record {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid record {}", path.display()))
}

pub fn write_proof(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write proof {}", path.display()))
}

pub fn remediation_hint(remediation: Remediation) -> &'static str {
    match remediation {
        Remediation::RetryHybrid => "try again later",
        Remediation::UseFallback => "run again with --strategy automation",
        Remediation::CorrectRecord => "fix the record and submit again",
        Remediation::Abort => "nothing to retry",
    }
}
