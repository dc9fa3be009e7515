//! Configuration loading, validation, and management for Foreman.
//!
//! Loads configuration from `~/.foreman/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.foreman/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persistence for runs, memory and budgets
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Context assembly defaults
    #[serde(default)]
    pub context: ContextConfig,

    /// Memory defaults
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tool category → permission flag an agent configuration must hold.
    /// Categories without an entry are unrestricted.
    #[serde(default = "default_permissions")]
    pub permissions: BTreeMap<String, String>,

    /// Tool category → approval action type checked against the team's
    /// AI settings.
    #[serde(default = "default_approvals")]
    pub approvals: BTreeMap<String, String>,

    /// Per-kind workflow input requirements
    #[serde(default)]
    pub workflows: Vec<WorkflowKindConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:foreman.db` or `sqlite::memory:`
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    format!("sqlite:{}", AppConfig::config_dir().join("foreman.db").display())
}
fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for an agent context when a step does not set one
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,
}

fn default_token_budget() -> usize {
    4000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_token_budget: default_token_budget(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// TTL applied by the memory tools when the caller gives none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

/// Input requirements of one workflow kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowKindConfig {
    pub kind: String,

    /// Top-level keys the `input` payload must carry
    #[serde(default)]
    pub required_input: Vec<String>,
}

fn default_permissions() -> BTreeMap<String, String> {
    [
        ("tasks", "can_modify_tasks"),
        ("projects", "can_modify_projects"),
        ("communications", "can_send_communications"),
        ("documents", "can_create_documents"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_approvals() -> BTreeMap<String, String> {
    [
        ("communications", "client_communication"),
        ("documents", "document_publish"),
        ("tasks", "task_changes"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl AppConfig {
    /// Load configuration from the default path (~/.foreman/config.toml).
    ///
    /// Environment overrides, highest priority:
    /// - `FOREMAN_DATABASE_URL`
    /// - `FOREMAN_TOKEN_BUDGET`
    /// - `FOREMAN_LOG_JSON`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup, then re-validate.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("FOREMAN_DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(raw) = lookup("FOREMAN_TOKEN_BUDGET") {
            self.context.default_token_budget = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "FOREMAN_TOKEN_BUDGET must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("FOREMAN_LOG_JSON") {
            self.logging.json = matches!(raw.trim(), "1" | "true" | "yes");
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".foreman")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.default_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context.default_token_budget must be > 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".into(),
            ));
        }

        if let Some(ttl) = self.memory.default_ttl_minutes
            && ttl <= 0
        {
            return Err(ConfigError::ValidationError(
                "memory.default_ttl_minutes must be > 0 when set".into(),
            ));
        }

        for (section, map) in [("permissions", &self.permissions), ("approvals", &self.approvals)] {
            if let Some((category, _)) = map.iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "{section}.{category} must not be empty"
                )));
            }
        }

        let mut kinds = BTreeSet::new();
        for workflow in &self.workflows {
            if !kinds.insert(workflow.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "workflow kind '{}' is configured twice",
                    workflow.kind
                )));
            }
        }

        Ok(())
    }

    /// Required input keys for a workflow kind (empty when unconfigured).
    pub fn required_input(&self, kind: &str) -> &[String] {
        self.workflows
            .iter()
            .find(|w| w.kind == kind)
            .map(|w| w.required_input.as_slice())
            .unwrap_or(&[])
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
            permissions: default_permissions(),
            approvals: default_approvals(),
            workflows: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
