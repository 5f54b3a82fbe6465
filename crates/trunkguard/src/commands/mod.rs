//! Command implementations and the context they share.

pub mod health;
pub mod precheck;
pub mod queue;
pub mod rollback;
pub mod scheduler;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;
use trunkguard_core::{
    alerts::{build_sink, AlertSink},
    config::{load_config, Config},
    coordination::{MergeLock, MergeLockSettings, QueueStore},
    output::{OutputFormat, SchemaEnvelope},
    repository::{GitCli, RepositoryClient},
    rollback::{compile_patterns, ContextGatherer, RollbackLedger},
};

/// Configuration plus the handles every command needs.
pub struct AppContext {
    pub config: Config,
    pub store: QueueStore,
    pub repo: Arc<dyn RepositoryClient>,
    pub alerts: Arc<dyn AlertSink>,
}

impl AppContext {
    /// Load configuration for `repo_root` (or the current directory) and open the queue.
    pub async fn open(repo_root: Option<&str>) -> Result<Self> {
        let root = repo_root.map(PathBuf::from);
        let mut config = load_config(root.as_deref())?;
        if let Some(root) = repo_root {
            config.repository.path = root.to_string();
        }
        tracing::debug!(repository = %config.repository.path, trunk = %config.repository.trunk, "Configuration loaded");

        let store = QueueStore::open(&config.database_path(), &config.queue_lock_path()).await?;
        let repo: Arc<dyn RepositoryClient> = Arc::new(GitCli::new(
            &config.repository.path,
            config.repository.remote.clone(),
        ));
        let alerts = build_sink(&config.alerts, Path::new(&config.repository.path));

        Ok(Self {
            config,
            store,
            repo,
            alerts,
        })
    }

    pub fn trunk(&self) -> &str {
        &self.config.repository.trunk
    }

    pub async fn merge_lock(&self) -> Result<MergeLock> {
        let lock = MergeLock::new(
            self.store.pool().clone(),
            MergeLockSettings::from_config(&self.config.merge),
        );
        lock.init().await?;
        Ok(lock)
    }

    pub async fn ledger(&self) -> Result<RollbackLedger> {
        let ledger = RollbackLedger::new(self.store.pool().clone());
        ledger.init().await?;
        Ok(ledger)
    }

    pub async fn gatherer(&self) -> Result<ContextGatherer> {
        Ok(ContextGatherer::new(
            self.store.clone(),
            Arc::clone(&self.repo),
            self.merge_lock().await?,
            self.ledger().await?,
            compile_patterns(&self.config.rollback.migration_patterns)?,
        ))
    }
}

pub fn format_of(matches: &ArgMatches) -> OutputFormat {
    OutputFormat::from_json_flag(matches.get_flag("json"))
}

/// Print `data` as a `schema` envelope in JSON mode, otherwise run `human`.
pub fn emit<T: Serialize>(
    format: OutputFormat,
    schema: &str,
    data: &T,
    human: impl FnOnce(&T),
) -> Result<()> {
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&SchemaEnvelope::new(schema, data))?);
    } else {
        human(data);
    }
    Ok(())
}
