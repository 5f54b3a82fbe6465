//! The periodic sampling loop.
//!
//! Each tick takes a [`HealthSnapshot`], derives failure signals from it,
//! and hands the most severe one to the decision engine. What happens next
//! depends on the recommendation:
//!
//! | Recommendation | Action                                              |
//! |----------------|-----------------------------------------------------|
//! | `IMMEDIATE`    | execute now (or alert only, without `auto_execute`) |
//! | `SCHEDULED`    | deferred rollback keyed by trunk, cancelable        |
//! | `MONITOR`      | warning alert                                       |
//! | `NONE`         | nothing                                             |
//!
//! A healthy sample cancels a pending deferred rollback. When the timer
//! fires, the trunk is sampled and analyzed again; the rollback only runs if
//! the fresh decision is still actionable, feasible and aimed at the same
//! revert point.
//!
//! After a rollback that did not restore health, automatic execution is held
//! until an operator acknowledges the failed execution; ticks only alert.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use super::{
    probes::{HealthProbe, ProbeResult},
    snapshot::{slo_budget_consumed, HealthHistory, HealthSnapshot},
    system::{read_saturation, Saturation},
};
use crate::{
    alerts::{AlertEvent, AlertKind, AlertSeverity, AlertSink},
    config::{Config, ThresholdsConfig},
    repository::CommitId,
    rollback::{
        analyze, classify, ContextGatherer, DecisionPolicy, FailureType, HealthVerifier,
        RollbackDecision, RollbackExecutor, RollbackLedger, RollbackRecommendation, RollbackReport,
        Severity,
    },
    shutdown::ShutdownSignal,
    timers::DeferredTasks,
    Result,
};

/// Error-rate spikes below this are noise regardless of thresholds.
const ERROR_RATE_FLOOR_PERCENT: f64 = 5.0;

pub type SaturationSource = Arc<dyn Fn() -> Saturation + Send + Sync>;

/// Run every probe concurrently.
async fn run_probes(probes: &[Arc<dyn HealthProbe>]) -> Vec<ProbeResult> {
    futures::future::join_all(probes.iter().map(|probe| probe.check())).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SIGNALS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Signal {
    pub failure_type: FailureType,
    pub magnitude: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub trunk: String,
    pub interval: Duration,
    pub history_len: usize,
    pub error_window: usize,
    pub slo_target_percent: f64,
    pub liveness_failures: u32,
    pub auto_execute: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            trunk: config.repository.trunk.clone(),
            interval: Duration::from_secs(config.health.sample_interval_secs),
            history_len: config.health.history_len,
            error_window: config.health.error_window,
            slo_target_percent: config.health.slo_target_percent,
            liveness_failures: config.health.liveness_failures_before_signal,
            auto_execute: config.health.auto_execute,
        }
    }
}

/// Failure signals present in `snapshot`, given the history before it.
///
/// Liveness magnitude is the share of probes currently failing; it only
/// fires once some probe has failed `liveness_failures` samples in a row.
pub fn derive_signals(
    snapshot: &HealthSnapshot,
    history: &HealthHistory,
    settings: &MonitorSettings,
    thresholds: &ThresholdsConfig,
) -> Vec<Signal> {
    let signal = |failure_type, magnitude| Signal {
        failure_type,
        magnitude,
        severity: classify(failure_type, magnitude, thresholds),
    };
    let mut signals = Vec::new();

    let persistent = snapshot.failing_probes().any(|p| {
        history.consecutive_failures(&p.name, &snapshot.probes) >= settings.liveness_failures.max(1)
    });
    if persistent {
        let failing = snapshot.failing_probes().count();
        let share = usize_percent(failing, snapshot.probes.len());
        signals.push(signal(FailureType::LivenessProbeFailure, share));
    }

    let error_floor = thresholds.error_rate_spike.medium.max(ERROR_RATE_FLOOR_PERCENT);
    if snapshot.error_rate_percent > error_floor {
        signals.push(signal(FailureType::ErrorRateSpike, snapshot.error_rate_percent));
    }

    let consumed = snapshot.slo_budget_consumed_percent();
    if consumed >= thresholds.slo_violation.medium && consumed > 0.0 {
        signals.push(signal(FailureType::SloViolation, consumed));
    }

    if let Some(saturation) = snapshot.saturation.percent() {
        if saturation >= thresholds.performance_degradation.medium {
            signals.push(signal(FailureType::PerformanceDegradation, saturation));
        }
    }

    signals
}

/// The signal that drives a decision: highest severity, earliest on ties.
pub fn strongest(signals: &[Signal]) -> Option<&Signal> {
    signals
        .iter()
        .rev()
        .max_by_key(|s| s.severity)
}

fn usize_percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let part = f64::from(u32::try_from(part).unwrap_or(u32::MAX));
    let whole = f64::from(u32::try_from(whole).unwrap_or(u32::MAX));
    part / whole * 100.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MONITOR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MonitorAction {
    Healthy,
    /// Healthy again; a pending deferred rollback was canceled.
    Recovered,
    /// Degraded, but the decision asks for nothing beyond watching.
    Watching,
    Executed { report: RollbackReport },
    ExecutionFailed { error: String },
    /// Actionable but not executed (no `auto_execute`, infeasible, or dry run).
    Recommended,
    Scheduled { delay_secs: u64 },
    AlreadyScheduled,
    /// A deferred rollback fired but the fresh evaluation no longer backs it.
    Canceled { reason: String },
    /// Automatic rollback is on hold behind an unacknowledged failed execution.
    Held { execution_id: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub snapshot: HealthSnapshot,
    pub signals: Vec<Signal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RollbackDecision>,
    #[serde(flatten)]
    pub action: MonitorAction,
}

#[derive(Clone)]
pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    saturation: SaturationSource,
    history: Arc<Mutex<HealthHistory>>,
    gatherer: ContextGatherer,
    ledger: RollbackLedger,
    executor: RollbackExecutor,
    policy: DecisionPolicy,
    alerts: Arc<dyn AlertSink>,
    deferred: DeferredTasks,
    settings: MonitorSettings,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("probes", &self.probes.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probes: Vec<Arc<dyn HealthProbe>>,
        gatherer: ContextGatherer,
        ledger: RollbackLedger,
        executor: RollbackExecutor,
        policy: DecisionPolicy,
        alerts: Arc<dyn AlertSink>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            probes,
            saturation: Arc::new(read_saturation),
            history: Arc::new(Mutex::new(HealthHistory::new(settings.history_len))),
            gatherer,
            ledger,
            executor,
            policy,
            alerts,
            deferred: DeferredTasks::new(),
            settings,
        }
    }

    /// Replace the `/proc` reader, e.g. with a fixed figure in tests.
    #[must_use]
    pub fn with_saturation_source(mut self, source: SaturationSource) -> Self {
        self.saturation = source;
        self
    }

    pub const fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub const fn deferred(&self) -> &DeferredTasks {
        &self.deferred
    }

    pub async fn latest(&self) -> Option<HealthSnapshot> {
        self.history.lock().await.latest().cloned()
    }

    /// Take a snapshot without recording it.
    pub async fn sample(&self) -> HealthSnapshot {
        let probes = run_probes(&self.probes).await;
        let error_rate_percent = self
            .history
            .lock()
            .await
            .error_rate_with(&probes, self.settings.error_window);
        let consumed = slo_budget_consumed(error_rate_percent, self.settings.slo_target_percent);
        HealthSnapshot {
            taken_at: Utc::now(),
            probes,
            error_rate_percent,
            slo_budget_remaining_percent: 100.0 - consumed,
            saturation: (self.saturation)(),
        }
    }

    /// Sample, derive signals against the history, then record the sample.
    async fn observe(&self) -> (HealthSnapshot, Vec<Signal>) {
        let snapshot = self.sample().await;
        let mut history = self.history.lock().await;
        let signals = derive_signals(&snapshot, &history, &self.settings, &self.policy.thresholds);
        history.push(snapshot.clone());
        (snapshot, signals)
    }

    /// Sample, decide, act. A dry run neither records nor mutates anything.
    pub async fn tick(&self, dry_run: bool) -> Result<TickReport> {
        let (snapshot, signals) = self.observe().await;
        let trunk = self.settings.trunk.clone();

        let Some(signal) = strongest(&signals).copied() else {
            let action = if !dry_run && self.deferred.cancel(&trunk).await {
                tracing::info!(trunk = %trunk, "Health recovered; deferred rollback canceled");
                self.alerts.emit(
                    &AlertEvent::new(
                        AlertKind::RollbackCanceled,
                        AlertSeverity::Info,
                        format!("'{trunk}' recovered before the scheduled rollback"),
                    )
                    .with_target(&trunk),
                );
                MonitorAction::Recovered
            } else {
                MonitorAction::Healthy
            };
            return Ok(TickReport {
                snapshot,
                signals,
                decision_id: None,
                decision: None,
                action,
            });
        };

        let context = self.gatherer.gather(&trunk, signal.magnitude, None).await?;
        let decision = analyze(signal.failure_type, &context, &self.policy);
        tracing::info!(
            trunk = %trunk,
            failure = %signal.failure_type,
            magnitude = signal.magnitude,
            severity = %decision.severity,
            recommendation = %decision.recommendation,
            feasible = decision.feasible,
            "Health signal evaluated"
        );

        if dry_run {
            return Ok(TickReport {
                snapshot,
                signals,
                decision_id: None,
                decision: Some(decision),
                action: MonitorAction::Recommended,
            });
        }

        let decision_id = self.ledger.record_decision(&trunk, &decision).await?;
        let action = match self.held_by(&trunk, &decision).await? {
            Some(execution_id) => MonitorAction::Held { execution_id },
            None => self.act(&trunk, decision_id, &decision).await,
        };
        Ok(TickReport {
            snapshot,
            signals,
            decision_id: Some(decision_id),
            decision: Some(decision),
            action,
        })
    }

    async fn act(&self, trunk: &str, decision_id: i64, decision: &RollbackDecision) -> MonitorAction {
        match decision.recommendation {
            RollbackRecommendation::None => MonitorAction::Healthy,
            RollbackRecommendation::Monitor => {
                self.alerts.emit(
                    &AlertEvent::new(
                        AlertKind::HealthDegraded,
                        AlertSeverity::Warning,
                        format!(
                            "'{trunk}' degraded: {} at {:.1} ({})",
                            decision.failure_type, decision.magnitude, decision.severity
                        ),
                    )
                    .with_target(trunk),
                );
                MonitorAction::Watching
            }
            RollbackRecommendation::Immediate if self.settings.auto_execute && decision.feasible => {
                self.execute_now(trunk, decision_id, decision).await
            }
            RollbackRecommendation::Scheduled if decision.feasible => {
                self.schedule(trunk, decision_id, decision).await
            }
            RollbackRecommendation::Immediate | RollbackRecommendation::Scheduled => {
                self.recommend_only(trunk, decision_id, decision);
                MonitorAction::Recommended
            }
        }
    }

    /// Run the rollback and start the health history afresh once the trunk changed.
    async fn execute_now(&self, trunk: &str, decision_id: i64, decision: &RollbackDecision) -> MonitorAction {
        match self.executor.execute(trunk, decision_id, decision).await {
            Ok(report) => {
                self.history.lock().await.clear();
                MonitorAction::Executed { report }
            }
            Err(e) => {
                tracing::error!(trunk, decision_id, error = %e, "Rollback failed");
                MonitorAction::ExecutionFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// The failed execution blocking an actionable `decision`, alerting if there is one.
    async fn held_by(&self, trunk: &str, decision: &RollbackDecision) -> Result<Option<i64>> {
        if !decision.recommendation.is_actionable() {
            return Ok(None);
        }
        let Some(failed) = self.ledger.unresolved_failure(trunk).await? else {
            return Ok(None);
        };
        tracing::warn!(trunk, execution_id = failed.id, "Automatic rollback on hold");
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::RollbackHeld,
                AlertSeverity::Critical,
                format!(
                    "'{trunk}' still shows {} ({}) but rollback execution {} did not restore health; \
                     automatic rollback is on hold until it is acknowledged",
                    decision.failure_type, decision.severity, failed.id
                ),
            )
            .with_target(trunk),
        );
        Ok(Some(failed.id))
    }

    async fn schedule(&self, trunk: &str, decision_id: i64, decision: &RollbackDecision) -> MonitorAction {
        let delay_secs = decision.rollback_window_secs;
        let monitor = self.clone();
        let owned_trunk = trunk.to_string();
        let owned_decision = decision.clone();

        let scheduled = self
            .deferred
            .schedule(trunk, Duration::from_secs(delay_secs), async move {
                // Detached so that shutdown cannot abort a rollback in progress.
                let run = tokio::spawn(async move {
                    monitor
                        .run_deferred(&owned_trunk, decision_id, &owned_decision)
                        .await
                });
                match run.await {
                    Ok(Ok(action)) => tracing::info!(decision_id, action = ?action, "Deferred rollback resolved"),
                    Ok(Err(e)) => tracing::error!(decision_id, error = %e, "Deferred rollback failed"),
                    Err(e) => tracing::error!(decision_id, error = %e, "Deferred rollback task panicked"),
                }
            })
            .await;

        if !scheduled {
            return MonitorAction::AlreadyScheduled;
        }
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::RollbackScheduled,
                AlertSeverity::Warning,
                format!(
                    "'{trunk}' will be rolled back in {delay_secs}s unless it recovers ({} {})",
                    decision.severity, decision.failure_type
                ),
            )
            .with_target(trunk),
        );
        MonitorAction::Scheduled { delay_secs }
    }

    /// Fire a deferred rollback scheduled by decision `scheduled_id`.
    ///
    /// Samples and analyzes again first. The rollback is canceled, with a
    /// `RollbackCanceled` alert, when health recovered or the fresh decision
    /// is no longer actionable, no longer feasible, or reverts to a different
    /// point than `scheduled` did.
    pub async fn run_deferred(
        &self,
        trunk: &str,
        scheduled_id: i64,
        scheduled: &RollbackDecision,
    ) -> Result<MonitorAction> {
        let (_, signals) = self.observe().await;
        let Some(signal) = strongest(&signals).copied() else {
            return Ok(self.cancel_deferred(trunk, scheduled_id, "health recovered".to_string()));
        };

        let context = self.gatherer.gather(trunk, signal.magnitude, None).await?;
        let decision = analyze(signal.failure_type, &context, &self.policy);
        let decision_id = self.ledger.record_decision(trunk, &decision).await?;

        let stale = if !decision.recommendation.is_actionable() {
            Some(format!("the trunk now only needs {}", decision.recommendation))
        } else if !decision.feasible {
            Some(format!("no longer feasible: {}", decision.blocking_reasons.join("; ")))
        } else if decision.target_version != scheduled.target_version {
            Some(format!(
                "revert point moved from {} to {}",
                short_or_none(scheduled.target_version.as_ref()),
                short_or_none(decision.target_version.as_ref())
            ))
        } else {
            None
        };
        if let Some(reason) = stale {
            return Ok(self.cancel_deferred(trunk, scheduled_id, reason));
        }

        if let Some(execution_id) = self.held_by(trunk, &decision).await? {
            return Ok(MonitorAction::Held { execution_id });
        }
        tracing::info!(trunk, scheduled_id, decision_id, "Deferred rollback confirmed");
        Ok(self.execute_now(trunk, decision_id, &decision).await)
    }

    fn cancel_deferred(&self, trunk: &str, scheduled_id: i64, reason: String) -> MonitorAction {
        tracing::info!(trunk, scheduled_id, reason = %reason, "Deferred rollback canceled");
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::RollbackCanceled,
                AlertSeverity::Info,
                format!("scheduled rollback of '{trunk}' (decision {scheduled_id}) canceled: {reason}"),
            )
            .with_target(trunk),
        );
        MonitorAction::Canceled { reason }
    }

    fn recommend_only(&self, trunk: &str, decision_id: i64, decision: &RollbackDecision) {
        let mut message = format!(
            "'{trunk}': {} rollback recommended for {} (decision {decision_id})",
            decision.recommendation, decision.failure_type
        );
        if !decision.feasible {
            message.push_str(&format!("; blocked: {}", decision.blocking_reasons.join("; ")));
        }
        self.alerts.emit(
            &AlertEvent::new(AlertKind::RollbackRecommended, AlertSeverity::Error, message).with_target(trunk),
        );
    }

    /// Tick every `interval` until shutdown. Pending deferred rollbacks are dropped.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) -> Result<u64> {
        tracing::info!(
            trunk = %self.settings.trunk,
            probes = self.probes.len(),
            interval_secs = self.settings.interval.as_secs(),
            "Health monitor started"
        );
        let mut ticks = 0_u64;
        loop {
            match self.tick(false).await {
                Ok(report) => {
                    ticks += 1;
                    tracing::debug!(error_rate = report.snapshot.error_rate_percent, "Health tick");
                }
                Err(e) => tracing::warn!(error = %e, "Health tick failed"),
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        let pending = self.deferred.pending_count().await;
        if pending > 0 {
            tracing::warn!(pending, "Dropping deferred rollbacks on shutdown");
        }
        self.deferred.shutdown_all().await;
        tracing::info!(ticks, "Health monitor stopped");
        Ok(ticks)
    }
}

fn short_or_none(commit: Option<&CommitId>) -> String {
    commit.map_or_else(|| "none".to_string(), |c| c.short().to_string())
}

/// Post-rollback verification: a fresh round of probes, all passing.
#[derive(Clone)]
pub struct ProbeVerifier {
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl ProbeVerifier {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self { probes }
    }
}

impl std::fmt::Debug for ProbeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeVerifier")
            .field("probes", &self.probes.len())
            .finish()
    }
}

#[async_trait]
impl HealthVerifier for ProbeVerifier {
    async fn is_healthy(&self) -> Result<bool> {
        let results = run_probes(&self.probes).await;
        for failed in results.iter().filter(|r| !r.passed) {
            tracing::debug!(probe = %failed.name, detail = ?failed.detail, "Probe still failing");
        }
        Ok(results.iter().all(|r| r.passed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MonitorSettings {
        MonitorSettings::from_config(&Config::default())
    }

    fn snapshot(passed: &[bool], error_rate: f64, consumed: f64, saturation: Option<f64>) -> HealthSnapshot {
        HealthSnapshot {
            taken_at: Utc::now(),
            probes: passed
                .iter()
                .enumerate()
                .map(|(i, ok)| {
                    if *ok {
                        ProbeResult::pass(format!("p{i}"), Some(0), 1)
                    } else {
                        ProbeResult::fail(format!("p{i}"), Some(1), 1, "down")
                    }
                })
                .collect(),
            error_rate_percent: error_rate,
            slo_budget_remaining_percent: 100.0 - consumed,
            saturation: Saturation {
                load_percent: saturation,
                io_pressure_percent: None,
            },
        }
    }

    #[test]
    fn test_healthy_snapshot_has_no_signals() {
        let t = ThresholdsConfig::default();
        let signals = derive_signals(&snapshot(&[true, true], 0.0, 0.0, Some(10.0)), &HealthHistory::new(5), &settings(), &t);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_liveness_needs_consecutive_failures() {
        let t = ThresholdsConfig::default();
        let s = settings();
        let mut history = HealthHistory::new(10);
        let failing = snapshot(&[false, true], 0.0, 0.0, None);

        let first = derive_signals(&failing, &history, &s, &t);
        assert!(first.iter().all(|sig| sig.failure_type != FailureType::LivenessProbeFailure));

        history.push(failing.clone());
        history.push(failing.clone());
        let third = derive_signals(&failing, &history, &s, &t);
        let liveness = third
            .iter()
            .find(|sig| sig.failure_type == FailureType::LivenessProbeFailure)
            .map(|sig| sig.magnitude);
        assert_eq!(liveness, Some(50.0));
    }

    #[test]
    fn test_error_rate_floor() {
        let t = ThresholdsConfig::default();
        let quiet = derive_signals(&snapshot(&[true], 4.0, 0.0, None), &HealthHistory::new(5), &settings(), &t);
        assert!(quiet.iter().all(|sig| sig.failure_type != FailureType::ErrorRateSpike));
        let loud = derive_signals(&snapshot(&[true], 30.0, 0.0, None), &HealthHistory::new(5), &settings(), &t);
        assert!(loud
            .iter()
            .any(|sig| sig.failure_type == FailureType::ErrorRateSpike && sig.severity == Severity::High));
    }

    #[test]
    fn test_slo_and_saturation_signals() {
        let t = ThresholdsConfig::default();
        let signals = derive_signals(&snapshot(&[true], 0.0, 80.0, Some(95.0)), &HealthHistory::new(5), &settings(), &t);
        let types: Vec<FailureType> = signals.iter().map(|s| s.failure_type).collect();
        assert_eq!(types, vec![FailureType::SloViolation, FailureType::PerformanceDegradation]);
    }

    #[test]
    fn test_strongest_prefers_severity_then_order() {
        let a = Signal {
            failure_type: FailureType::SloViolation,
            magnitude: 80.0,
            severity: Severity::High,
        };
        let b = Signal {
            failure_type: FailureType::PerformanceDegradation,
            magnitude: 95.0,
            severity: Severity::High,
        };
        let c = Signal {
            failure_type: FailureType::ErrorRateSpike,
            magnitude: 10.0,
            severity: Severity::Medium,
        };
        assert_eq!(strongest(&[c, a, b]).map(|s| s.failure_type), Some(FailureType::SloViolation));
        assert!(strongest(&[]).is_none());
    }

    #[tokio::test]
    async fn test_probe_verifier() {
        use crate::health::probes::CommandProbe;
        let ok: Arc<dyn HealthProbe> = Arc::new(CommandProbe::new("ok", "true", Duration::from_secs(5)));
        let bad: Arc<dyn HealthProbe> = Arc::new(CommandProbe::new("bad", "false", Duration::from_secs(5)));
        assert!(ProbeVerifier::new(vec![Arc::clone(&ok)]).is_healthy().await.unwrap_or(false));
        assert!(!ProbeVerifier::new(vec![ok, bad]).is_healthy().await.unwrap_or(true));
    }
}
