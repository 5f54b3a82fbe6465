//! Point-in-time samples and their short rolling history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{probes::ProbeResult, system::Saturation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub probes: Vec<ProbeResult>,
    /// Failed probe results over the error window, in percent.
    pub error_rate_percent: f64,
    /// Share of the SLO error budget not yet consumed, in percent.
    pub slo_budget_remaining_percent: f64,
    pub saturation: Saturation,
}

impl HealthSnapshot {
    pub fn all_probes_passed(&self) -> bool {
        self.probes.iter().all(|p| p.passed)
    }

    pub fn failing_probes(&self) -> impl Iterator<Item = &ProbeResult> {
        self.probes.iter().filter(|p| !p.passed)
    }

    pub fn slo_budget_consumed_percent(&self) -> f64 {
        100.0 - self.slo_budget_remaining_percent
    }
}

/// Budget consumed by an error rate against an SLO target, clamped to 0..=100.
pub fn slo_budget_consumed(error_rate_percent: f64, slo_target_percent: f64) -> f64 {
    let budget = 100.0 - slo_target_percent;
    if budget <= 0.0 {
        return if error_rate_percent > 0.0 { 100.0 } else { 0.0 };
    }
    (error_rate_percent / budget * 100.0).clamp(0.0, 100.0)
}

/// Bounded ring of recent snapshots, newest last.
#[derive(Debug, Clone, Default)]
pub struct HealthHistory {
    capacity: usize,
    samples: VecDeque<HealthSnapshot>,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, snapshot: HealthSnapshot) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
    }

    /// Forget every sample, e.g. once the trunk has been rolled back.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&HealthSnapshot> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HealthSnapshot> {
        self.samples.iter()
    }

    /// Error rate over the `window` newest samples plus `current`.
    pub fn error_rate_with(&self, current: &[ProbeResult], window: usize) -> f64 {
        let previous = window.saturating_sub(1);
        let (failed, total) = self
            .samples
            .iter()
            .rev()
            .take(previous)
            .flat_map(|s| s.probes.iter())
            .chain(current.iter())
            .fold((0_u32, 0_u32), |(failed, total), p| {
                (failed + u32::from(!p.passed), total + 1)
            });
        if total == 0 {
            0.0
        } else {
            f64::from(failed) / f64::from(total) * 100.0
        }
    }

    /// Consecutive newest samples in which `probe` failed, counting `current` first.
    pub fn consecutive_failures(&self, probe: &str, current: &[ProbeResult]) -> u32 {
        let failed_in = |results: &[ProbeResult]| {
            results.iter().any(|p| p.name == probe && !p.passed)
        };
        if !failed_in(current) {
            return 0;
        }
        let earlier = self
            .samples
            .iter()
            .rev()
            .take_while(|s| failed_in(&s.probes))
            .count();
        u32::try_from(earlier).unwrap_or(u32::MAX).saturating_add(1)
    }
}
