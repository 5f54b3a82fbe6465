//! Configuration loading from files and environment
//!
//! This module handles loading configuration from:
//! 1. Built-in defaults
//! 2. Global config: ~/.config/trunkguard/config.toml
//! 3. Project config: <repo>/.trunkguard/config.toml
//! 4. Environment variables: TRUNKGUARD_*

use std::path::{Path, PathBuf};

use toml::{Table, Value};

use super::{merge::merge_tables, types::Config};
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// `project_root` is the directory holding `.trunkguard/config.toml`; the
/// current directory is used when it is `None`.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or has wrongly typed keys
/// - An environment override cannot be parsed
/// - The merged values fail validation
pub fn load_config(project_root: Option<&Path>) -> Result<Config> {
    let layers = global_config_path()
        .into_iter()
        .chain(std::iter::once(project_config_path(project_root)?))
        .filter(|path| path.exists())
        .map(|path| load_toml_table(&path))
        .collect::<Result<Vec<_>>>()?;

    let merged = layers.into_iter().fold(defaults_table()?, merge_tables);

    let config: Config = Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| Error::parse_error(format!("Invalid configuration: {e}")))?;

    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "trunkguard")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path(project_root: Option<&Path>) -> Result<PathBuf> {
    let root = match project_root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| Error::io_error(format!("Failed to get current directory: {e}")))?,
    };
    Ok(root.join(".trunkguard").join("config.toml"))
}

/// Load a single TOML file as a complete `Config` (missing keys take defaults).
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_toml_file(path: &Path) -> Result<Config> {
    let overlay = load_toml_table(path)?;
    Value::Table(merge_tables(defaults_table()?, overlay))
        .try_into()
        .map_err(|e: toml::de::Error| {
            Error::parse_error(format!("Failed to parse config file {}: {e}", path.display()))
        })
}

fn load_toml_table(path: &Path) -> Result<Table> {
    if path.is_dir() {
        return Err(Error::io_error(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::io_error(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::parse_error(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

fn defaults_table() -> Result<Table> {
    match Value::try_from(Config::default()) {
        Ok(Value::Table(table)) => Ok(table),
        Ok(_) => Err(Error::unknown("default configuration is not a table")),
        Err(e) => Err(Error::unknown(format!(
            "Failed to serialize default configuration: {e}"
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLE OVERRIDES
// ═══════════════════════════════════════════════════════════════════════════

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name).ok().map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::invalid_config(format!("Invalid {name} value: {e}")))
    })
}

impl Config {
    /// Apply environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("TRUNKGUARD_REPOSITORY_PATH") {
            self.repository.path = value;
        }

        if let Ok(value) = std::env::var("TRUNKGUARD_TRUNK") {
            if value.trim().is_empty() {
                return Err(Error::invalid_config(
                    "TRUNKGUARD_TRUNK cannot be empty - unset the variable or provide a branch name",
                ));
            }
            self.repository.trunk = value;
        }

        if let Ok(value) = std::env::var("TRUNKGUARD_REMOTE") {
            self.repository.remote = Some(value).filter(|v| !v.trim().is_empty());
        }

        if let Ok(value) = std::env::var("TRUNKGUARD_DATABASE") {
            self.queue.database = value;
        }

        if let Some(value) = env_parse("TRUNKGUARD_RETRY_CAP")? {
            self.queue.retry_cap = value;
        }

        if let Some(value) = env_parse("TRUNKGUARD_POLL_INTERVAL_SECS")? {
            self.scheduler.poll_interval_secs = value;
        }

        if let Some(value) = env_parse("TRUNKGUARD_LOCK_TIMEOUT_SECS")? {
            self.merge.lock_timeout_secs = value;
        }

        if let Some(value) = env_parse("TRUNKGUARD_SAMPLE_INTERVAL_SECS")? {
            self.health.sample_interval_secs = value;
        }

        if let Some(value) = env_parse("TRUNKGUARD_ALERT_COOLDOWN_SECS")? {
            self.alerts.cooldown_secs = value;
        }

        if let Ok(value) = std::env::var("TRUNKGUARD_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(value).filter(|v| !v.trim().is_empty());
        }

        Ok(self)
    }

    /// Resolve a configured path against the repository path.
    pub fn resolve_path(&self, configured: &str) -> PathBuf {
        let path = Path::new(configured);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.repository.path).join(path)
        }
    }

    /// Location of the queue database.
    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.queue.database)
    }

    /// Location of the advisory lock file guarding queue mutations.
    pub fn queue_lock_path(&self) -> PathBuf {
        self.queue.lock_file.as_deref().map_or_else(
            || {
                let mut db = self.database_path().into_os_string();
                db.push(".lock");
                PathBuf::from(db)
            },
            |lock| self.resolve_path(lock),
        )
    }
}
