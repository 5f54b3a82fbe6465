//! Default configuration values

use super::types::{
    AlertsConfig, Config, HealthConfig, MergeConfig, QueueConfig, RebaseConfig, RepositoryConfig,
    RollbackConfig, SchedulerConfig, Thresholds, ThresholdsConfig,
};

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            merge: MergeConfig::default(),
            rebase: RebaseConfig::default(),
            health: HealthConfig::default(),
            rollback: RollbackConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
            trunk: "main".to_string(),
            remote: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database: ".trunkguard/queue.db".to_string(),
            lock_file: None,
            default_priority: 5,
            retry_cap: 3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            processor_lock_ttl_secs: 300,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 60,
            lock_ttl_secs: 600,
            lock_retry_ms: 250,
        }
    }
}

impl Default for RebaseConfig {
    fn default() -> Self {
        Self {
            max_auto_files: 5,
            prefer_source: true,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            history_len: 20,
            error_window: 10,
            slo_target_percent: 99.0,
            liveness_failures_before_signal: 3,
            probes: Vec::new(),
            auto_execute: true,
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            recent_integration_minutes: 30,
            immediate_window_secs: 300,
            scheduled_window_secs: 1800,
            per_commit_secs: 30,
            verify_retries: 5,
            verify_delay_secs: 10,
            min_free_bytes: 100 * 1024 * 1024,
            migration_patterns: vec![
                r"(^|/)migrations?/".to_string(),
                r"\.sql$".to_string(),
            ],
            block_on_migrations: false,
            thresholds: ThresholdsConfig::default(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            // Percent of sampled requests failing. Anything short of HIGH is MEDIUM.
            error_rate_spike: Thresholds {
                critical: 50.0,
                high: 25.0,
                medium: 0.0,
            },
            // Percent of probes failing.
            liveness_probe_failure: Thresholds {
                critical: 100.0,
                high: 50.0,
                medium: 0.0,
            },
            // Percent of the error budget consumed.
            slo_violation: Thresholds {
                critical: 100.0,
                high: 75.0,
                medium: 50.0,
            },
            // Percent resource saturation.
            performance_degradation: Thresholds {
                critical: 99.0,
                high: 90.0,
                medium: 75.0,
            },
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            log_file: None,
            webhook_url: None,
        }
    }
}
