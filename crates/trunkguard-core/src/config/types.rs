//! Configuration type definitions
//!
//! Pure data holders. Every section uses `#[serde(default)]` so a partial
//! file only overrides the keys it names.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// MAIN CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Root configuration structure
///
/// Loaded from defaults → global → project → env vars → CLI flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub merge: MergeConfig,
    pub rebase: RebaseConfig,
    pub health: HealthConfig,
    pub rollback: RollbackConfig,
    pub alerts: AlertsConfig,
}

// ═══════════════════════════════════════════════════════════════════════════
// NESTED CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Working copy the service operates on.
    pub path: String,
    /// Trunk branch name.
    pub trunk: String,
    /// Remote to fetch from and push to. `None` means local refs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// `SQLite` database, relative to the repository path unless absolute.
    pub database: String,
    /// Advisory lock file guarding store mutations. Defaults to `<database>.lock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<String>,
    pub default_priority: i32,
    pub retry_cap: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub processor_lock_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub lock_timeout_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_retry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RebaseConfig {
    /// Largest conflicting file set still considered for an automatic rebase.
    pub max_auto_files: usize,
    /// Resolve rebase conflicts in favour of the source branch.
    pub prefer_source: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub sample_interval_secs: u64,
    pub history_len: usize,
    pub error_window: usize,
    pub slo_target_percent: f64,
    pub liveness_failures_before_signal: u32,
    pub probes: Vec<ProbeConfig>,
    /// Execute IMMEDIATE recommendations without a human in the loop.
    pub auto_execute: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    pub name: String,
    pub kind: ProbeKind,
    /// URL for `http` probes, shell command line for `command` probes.
    pub target: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

pub(super) const fn default_probe_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RollbackConfig {
    pub recent_integration_minutes: i64,
    pub immediate_window_secs: u64,
    pub scheduled_window_secs: u64,
    pub per_commit_secs: u64,
    pub verify_retries: u32,
    pub verify_delay_secs: u64,
    pub min_free_bytes: u64,
    /// Regular expressions matched against changed paths in the revert range.
    pub migration_patterns: Vec<String>,
    pub block_on_migrations: bool,
    pub thresholds: ThresholdsConfig,
}

/// Severity cut-offs for one failure type, in that type's magnitude unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ThresholdsConfig {
    pub error_rate_spike: Thresholds,
    pub liveness_probe_failure: Thresholds,
    pub slo_violation: Thresholds,
    pub performance_degradation: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_secs: u64,
    /// Append every alert as one JSON line to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    /// POST every alert as JSON to this URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}
