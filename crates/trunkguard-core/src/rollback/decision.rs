//! Rollback decision engine.
//!
//! [`analyze`] is a pure function: the same failure type and context always
//! produce the same decision. Everything that touches the repository or the
//! database happens before (context gathering) or after (execution).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::feasibility::check_feasibility;
use crate::{
    config::{RollbackConfig, Thresholds, ThresholdsConfig},
    repository::CommitId,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CLASSIFICATION ENUMS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed set of failure signals.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum FailureType {
    LivenessProbeFailure,
    #[serde(alias = "service-level-objective-violation")]
    #[strum(to_string = "slo-violation", serialize = "service-level-objective-violation")]
    SloViolation,
    ErrorRateSpike,
    PerformanceDegradation,
    DeploymentFailure,
}

impl FailureType {
    pub const fn all() -> &'static [Self] {
        &[
            Self::LivenessProbeFailure,
            Self::SloViolation,
            Self::ErrorRateSpike,
            Self::PerformanceDegradation,
            Self::DeploymentFailure,
        ]
    }

    /// Unit of the magnitude this type is classified on.
    pub const fn magnitude_unit(&self) -> &'static str {
        match self {
            Self::LivenessProbeFailure => "% of probes failing",
            Self::SloViolation => "% of error budget consumed",
            Self::ErrorRateSpike => "% sampled error rate",
            Self::PerformanceDegradation => "% resource saturation",
            Self::DeploymentFailure => "ignored",
        }
    }

    /// Severity cut-offs for this type. `None` for types that are always critical.
    pub const fn thresholds<'a>(&self, config: &'a ThresholdsConfig) -> Option<&'a Thresholds> {
        match self {
            Self::LivenessProbeFailure => Some(&config.liveness_probe_failure),
            Self::SloViolation => Some(&config.slo_violation),
            Self::ErrorRateSpike => Some(&config.error_rate_spike),
            Self::PerformanceDegradation => Some(&config.performance_degradation),
            Self::DeploymentFailure => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    const fn base_confidence(self) -> i32 {
        match self {
            Self::Critical => 90,
            Self::High => 75,
            Self::Medium => 60,
            Self::Low => 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackRecommendation {
    Immediate,
    Scheduled,
    Monitor,
    None,
}

impl RollbackRecommendation {
    /// Whether this recommendation asks for a trunk mutation.
    pub const fn is_actionable(&self) -> bool {
        matches!(self, Self::Immediate | Self::Scheduled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// INPUTS AND OUTPUT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decision knobs taken from `[rollback]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    pub thresholds: ThresholdsConfig,
    pub recent_window: Duration,
    pub immediate_window_secs: u64,
    pub scheduled_window_secs: u64,
    pub per_commit_secs: u64,
    pub min_free_bytes: u64,
    pub block_on_migrations: bool,
}

impl DecisionPolicy {
    pub fn from_config(config: &RollbackConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            recent_window: Duration::minutes(config.recent_integration_minutes),
            immediate_window_secs: config.immediate_window_secs,
            scheduled_window_secs: config.scheduled_window_secs,
            per_commit_secs: config.per_commit_secs,
            min_free_bytes: config.min_free_bytes,
            block_on_migrations: config.block_on_migrations,
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::from_config(&RollbackConfig::default())
    }
}

/// Snapshot of everything the engine looks at, gathered beforehand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackContext {
    pub trunk: String,
    /// Observed magnitude in the failure type's unit.
    pub magnitude: f64,
    pub evaluated_at: DateTime<Utc>,
    /// Completion time of the most recent integration into the trunk.
    pub last_integration_at: Option<DateTime<Utc>>,
    /// Stable point to revert to.
    pub target_version: Option<CommitId>,
    pub target_exists: bool,
    /// Commits between the target and the trunk tip.
    pub commits_to_revert: usize,
    /// The tip's tree already equals the target's, e.g. after an earlier revert.
    #[serde(default)]
    pub trunk_matches_target: bool,
    /// A merge or rollback is currently mutating the trunk.
    pub operation_in_flight: bool,
    pub available_bytes: Option<u64>,
    /// Changed paths in the revert range matching a migration pattern.
    pub migration_files: Vec<String>,
}

impl RollbackContext {
    /// A context with no repository facts, for what-if evaluations.
    pub fn bare(trunk: impl Into<String>, magnitude: f64, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            trunk: trunk.into(),
            magnitude,
            evaluated_at,
            last_integration_at: None,
            target_version: None,
            target_exists: false,
            commits_to_revert: 0,
            trunk_matches_target: false,
            operation_in_flight: false,
            available_bytes: None,
            migration_files: Vec::new(),
        }
    }

    pub fn deployment_age(&self) -> Option<Duration> {
        self.last_integration_at.map(|at| self.evaluated_at - at)
    }
}

/// One immutable evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackDecision {
    pub failure_type: FailureType,
    pub magnitude: f64,
    pub severity: Severity,
    /// 0 to 100.
    pub confidence: u8,
    pub recommendation: RollbackRecommendation,
    pub target_version: Option<CommitId>,
    pub rollback_window_secs: u64,
    pub feasible: bool,
    pub blocking_reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub deployment_age_secs: Option<i64>,
    pub evaluated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENGINE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity of `magnitude` for `failure_type`.
pub fn classify(failure_type: FailureType, magnitude: f64, thresholds: &ThresholdsConfig) -> Severity {
    let Some(t) = failure_type.thresholds(thresholds) else {
        return Severity::Critical;
    };
    if magnitude >= t.critical {
        Severity::Critical
    } else if magnitude >= t.high {
        Severity::High
    } else if magnitude >= t.medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Recommendation for a severity at a deployment age. Unknown age counts as stable.
pub fn recommend(severity: Severity, age: Option<Duration>, recent_window: Duration) -> RollbackRecommendation {
    let recent = age.is_some_and(|age| age <= recent_window);
    match (severity, recent) {
        (Severity::Critical, true) => RollbackRecommendation::Immediate,
        (Severity::Critical, false) | (Severity::High, true) => RollbackRecommendation::Scheduled,
        (Severity::High, false) | (Severity::Medium, _) => RollbackRecommendation::Monitor,
        (Severity::Low, _) => RollbackRecommendation::None,
    }
}

fn window_secs(recommendation: RollbackRecommendation, commits: usize, policy: &DecisionPolicy) -> u64 {
    let per_commit = policy
        .per_commit_secs
        .saturating_mul(u64::try_from(commits).unwrap_or(u64::MAX));
    match recommendation {
        RollbackRecommendation::Immediate => policy.immediate_window_secs.saturating_add(per_commit),
        RollbackRecommendation::Scheduled => policy.scheduled_window_secs.saturating_add(per_commit),
        RollbackRecommendation::Monitor | RollbackRecommendation::None => 0,
    }
}

fn confidence(severity: Severity, age: Option<Duration>, recent_window: Duration) -> u8 {
    let adjustment = match age {
        Some(age) if age <= recent_window => 10,
        Some(_) => 0,
        None => -20,
    };
    let score = (severity.base_confidence() + adjustment).clamp(0, 100);
    u8::try_from(score).unwrap_or(100)
}

/// Evaluate a failure signal. Never mutates anything.
pub fn analyze(
    failure_type: FailureType,
    context: &RollbackContext,
    policy: &DecisionPolicy,
) -> RollbackDecision {
    let age = context.deployment_age();
    let severity = classify(failure_type, context.magnitude, &policy.thresholds);
    let recommendation = recommend(severity, age, policy.recent_window);
    let feasibility = check_feasibility(context, policy);

    RollbackDecision {
        failure_type,
        magnitude: context.magnitude,
        severity,
        confidence: confidence(severity, age, policy.recent_window),
        recommendation,
        target_version: context.target_version.clone(),
        rollback_window_secs: window_secs(recommendation, context.commits_to_revert, policy),
        feasible: feasibility.is_feasible(),
        blocking_reasons: feasibility.blocking_reasons,
        warnings: feasibility.warnings,
        deployment_age_secs: age.map(|a| a.num_seconds()),
        evaluated_at: context.evaluated_at,
    }
}
