//! Configuration validation

use regex::Regex;

use super::types::{Config, ProbeKind, Thresholds};
use crate::{coordination::MAX_LEASE_SECS, Error, Result};

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.repository.trunk.trim().is_empty() {
            return Err(Error::invalid_config("repository.trunk cannot be empty"));
        }

        let positive = [
            ("scheduler.poll_interval_secs", self.scheduler.poll_interval_secs),
            (
                "scheduler.processor_lock_ttl_secs",
                self.scheduler.processor_lock_ttl_secs,
            ),
            ("merge.lock_timeout_secs", self.merge.lock_timeout_secs),
            ("merge.lock_ttl_secs", self.merge.lock_ttl_secs),
            ("merge.lock_retry_ms", self.merge.lock_retry_ms),
            ("health.sample_interval_secs", self.health.sample_interval_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!("{name} must be greater than zero")));
        }

        let leases = [
            (
                "scheduler.processor_lock_ttl_secs",
                self.scheduler.processor_lock_ttl_secs,
            ),
            ("merge.lock_timeout_secs", self.merge.lock_timeout_secs),
            ("merge.lock_ttl_secs", self.merge.lock_ttl_secs),
        ];
        if let Some((name, _)) = leases.iter().find(|(_, value)| *value > MAX_LEASE_SECS) {
            return Err(Error::invalid_config(format!(
                "{name} must not exceed {MAX_LEASE_SECS} seconds"
            )));
        }

        if self.health.history_len == 0 || self.health.error_window == 0 {
            return Err(Error::invalid_config(
                "health.history_len and health.error_window must be greater than zero",
            ));
        }

        if !(0.0..100.0).contains(&self.health.slo_target_percent) {
            return Err(Error::invalid_config(
                "health.slo_target_percent must be in [0, 100)",
            ));
        }

        for probe in &self.health.probes {
            if probe.name.trim().is_empty() || probe.target.trim().is_empty() {
                return Err(Error::invalid_config(
                    "health probes need a non-empty name and target",
                ));
            }
            if probe.kind == ProbeKind::Http && !probe.target.starts_with("http") {
                return Err(Error::invalid_config(format!(
                    "probe '{}' is an http probe but its target is not a URL",
                    probe.name
                )));
            }
        }

        let thresholds = &self.rollback.thresholds;
        validate_thresholds("error-rate-spike", thresholds.error_rate_spike)?;
        validate_thresholds("liveness-probe-failure", thresholds.liveness_probe_failure)?;
        validate_thresholds("slo-violation", thresholds.slo_violation)?;
        validate_thresholds("performance-degradation", thresholds.performance_degradation)?;

        for pattern in &self.rollback.migration_patterns {
            Regex::new(pattern).map_err(|e| {
                Error::invalid_config(format!("Invalid migration pattern '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }
}

fn validate_thresholds(name: &str, t: Thresholds) -> Result<()> {
    if t.critical >= t.high && t.high >= t.medium && t.medium >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_config(format!(
            "rollback.thresholds.{name} must satisfy critical >= high >= medium >= 0"
        )))
    }
}
