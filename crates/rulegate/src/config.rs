use std::path::{Path, PathBuf};
use std::time::Duration;

use access_rules::EngineSettings;
use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cli::Cli;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default = "default_auth_config")]
    pub auth_config: PathBuf,
    #[serde(default = "default_indexes")]
    pub indexes: PathBuf,
    #[serde(default = "default_store")]
    pub store: PathBuf,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            auth_config: default_auth_config(),
            indexes: default_indexes(),
            store: default_store(),
            evaluation: EvaluationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_database_rules")]
    pub database: PathBuf,
    #[serde(default = "default_storage_rules")]
    pub storage: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            database: default_database_rules(),
            storage: default_storage_rules(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_lookups")]
    pub max_lookups: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_lookups: default_max_lookups(),
        }
    }
}

impl EvaluationConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            max_lookups: self.max_lookups,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_database_rules() -> PathBuf {
    PathBuf::from("config/database.rules.yaml")
}

fn default_storage_rules() -> PathBuf {
    PathBuf::from("config/storage.rules.yaml")
}

fn default_auth_config() -> PathBuf {
    PathBuf::from("config/auth.yaml")
}

fn default_indexes() -> PathBuf {
    PathBuf::from("config/firestore.indexes.json")
}

fn default_store() -> PathBuf {
    PathBuf::from("config/store.example.json")
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_max_lookups() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Read `rulegate.yaml`. Without a file, or with an empty one, every
/// setting takes its default.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found; using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    if contents.trim().is_empty() {
        debug!(path = %path.display(), "config file is empty; using defaults");
        return Ok(Config::default());
    }

    serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

impl Config {
    /// Apply command-line overrides on top of the file settings.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(ref path) = cli.database_rules {
            self.rules.database = path.clone();
        }
        if let Some(ref path) = cli.storage_rules {
            self.rules.storage = path.clone();
        }
        if let Some(ref path) = cli.store {
            self.store = path.clone();
        }
        if let Some(ms) = cli.timeout_ms {
            self.evaluation.timeout_ms = ms;
        }
        if let Some(n) = cli.max_lookups {
            self.evaluation.max_lookups = n;
        }
        if let Some(ref path) = cli.audit_log {
            self.logging.audit_log_path = path.clone();
        }
    }
}
