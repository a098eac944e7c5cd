use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use threadhash_core::{ChatlogConfig, MigrationConfig};

use crate::error::ThhError;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub chatlog: ChatlogSection,
    #[serde(default)]
    pub migration: MigrationSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatlogSection {
    pub fetch_timeout_ms: Option<u64>,
    pub max_page_limit: Option<usize>,
    pub archive_batch: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MigrationSection {
    pub page_size: Option<usize>,
    pub fallback_step_ms: Option<i64>,
    pub max_chain_depth: Option<usize>,
}

impl Config {
    /// Runtime configuration, with unset keys at their defaults.
    pub fn chatlog_config(&self, fetch_timeout_ms: Option<u64>) -> ChatlogConfig {
        let defaults = ChatlogConfig::default();
        let migration = MigrationConfig::default();
        ChatlogConfig {
            fetch_timeout: fetch_timeout_ms
                .or(self.chatlog.fetch_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            max_page_limit: self.chatlog.max_page_limit.unwrap_or(defaults.max_page_limit),
            archive_batch: self.chatlog.archive_batch.unwrap_or(defaults.archive_batch),
            migration: MigrationConfig {
                page_size: self.migration.page_size.unwrap_or(migration.page_size),
                fallback_step_ms: self.migration.fallback_step_ms.unwrap_or(migration.fallback_step_ms),
                max_chain_depth: self.migration.max_chain_depth.unwrap_or(migration.max_chain_depth),
            },
        }
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("threadhash").join("config.toml"))
}

/// Loads the config file. An explicit path must exist; the default location
/// may be absent.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ThhError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

pub fn resolve_data_dir(cli_dir: Option<PathBuf>, config: &Config) -> PathBuf {
    cli_dir
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(default_data_dir)
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("threadhash")
}
