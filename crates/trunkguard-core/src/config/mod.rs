//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/trunkguard/config.toml
//! 3. Project config: .trunkguard/config.toml
//! 4. Environment variables: TRUNKGUARD_*
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! [repository]
//! trunk = "main"
//! remote = "origin"
//!
//! [merge]
//! lock_timeout_secs = 30
//!
//! [[health.probes]]
//! name = "api"
//! kind = "http"
//! target = "http://127.0.0.1:8080/healthz"
//!
//! [rollback.thresholds.error-rate-spike]
//! critical = 40.0
//! high = 20.0
//! medium = 0.0
//! ```

mod defaults;
mod load;
mod merge;
mod types;
mod validate;

#[cfg(test)]
mod tests_loading;

pub use load::{global_config_path, load_config, load_toml_file, project_config_path};
pub use merge::merge_tables;
pub use types::{
    AlertsConfig, Config, HealthConfig, MergeConfig, ProbeConfig, ProbeKind, QueueConfig,
    RebaseConfig, RepositoryConfig, RollbackConfig, SchedulerConfig, Thresholds,
    ThresholdsConfig,
};
