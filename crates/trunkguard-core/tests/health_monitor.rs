// Integration tests have relaxed clippy settings for brutal test scenarios.
// Production code (src/) must use strict zero-unwrap/panic patterns.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    // Test code ergonomics
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::missing_panics_doc,
)]
//! Health monitor ticks driving the rollback engine.
//!
//! A switchable probe stands in for the service; saturation is pinned to
//! "unknown" so the host's load never leaks into a test.

mod common;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{FakeRepository, FixedVerifier, RecordingSink};
use trunkguard_core::{
    alerts::{AlertKind, AlertSeverity},
    config::{Config, Thresholds},
    coordination::{
        submit, MergeLock, MergeLockSettings, QueueStore, RebaseAdvisor, Scheduler,
        SchedulerSettings, SubmitRequest,
    },
    health::{
        CommandProbe, HealthMonitor, HealthProbe, MonitorAction, MonitorSettings, ProbeResult,
        ProbeVerifier, Saturation,
    },
    repository::CommitId,
    rollback::{
        compile_patterns, ContextGatherer, DecisionPolicy, ExecutionStatus, FailureType,
        HealthVerifier, RollbackExecutor, RollbackLedger, RollbackRecommendation, VerifySettings,
    },
};

// ============================================================================
// FIXTURES
// ============================================================================

/// Probe whose verdict the test flips.
#[derive(Clone)]
struct SwitchProbe {
    healthy: Arc<AtomicBool>,
}

impl SwitchProbe {
    fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
        }
    }

    fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    fn name(&self) -> &str {
        "api"
    }

    async fn check(&self) -> ProbeResult {
        if self.healthy.load(Ordering::SeqCst) {
            ProbeResult::pass("api", Some(200), 1)
        } else {
            ProbeResult::fail("api", Some(503), 1, "service unavailable")
        }
    }
}

struct Rig {
    store: QueueStore,
    repo: FakeRepository,
    alerts: RecordingSink,
    ledger: RollbackLedger,
    probe: SwitchProbe,
    monitor: HealthMonitor,
    bad_tip: CommitId,
}

fn lock_settings() -> MergeLockSettings {
    MergeLockSettings {
        ttl: Duration::from_secs(600),
        timeout: Duration::from_secs(2),
        retry: Duration::from_millis(10),
    }
}

/// Every magnitude up to 100% classifies as HIGH.
fn cap_at_high(policy: &mut DecisionPolicy) {
    let high = Thresholds {
        critical: 1_000.0,
        high: 1.0,
        medium: 0.5,
    };
    policy.thresholds.error_rate_spike = high;
    policy.thresholds.liveness_probe_failure = high;
    policy.thresholds.slo_violation = high;
    policy.thresholds.performance_degradation = high;
}

/// Every magnitude up to 100% classifies as MEDIUM.
fn cap_at_medium(policy: &mut DecisionPolicy) {
    let medium = Thresholds {
        critical: 1_000.0,
        high: 1_000.0,
        medium: 0.5,
    };
    policy.thresholds.error_rate_spike = medium;
    policy.thresholds.liveness_probe_failure = medium;
    policy.thresholds.slo_violation = medium;
    policy.thresholds.performance_degradation = medium;
}

/// Scheduled rollbacks fire after one second.
fn fire_quickly(policy: &mut DecisionPolicy) {
    cap_at_high(policy);
    policy.scheduled_window_secs = 1;
    policy.per_commit_secs = 0;
}

/// Merge `branch` into main through a short-lived scheduler.
async fn integrate(store: &QueueStore, repo: &FakeRepository, branch: &str) {
    submit(store, repo, SubmitRequest::new(branch, "main", "t"), 5)
        .await
        .unwrap();
    let mut settings = SchedulerSettings::from_config(&Config::default()).with_worker_id("scheduler");
    settings.merge_lock = lock_settings();
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(repo.clone()),
        RebaseAdvisor::new(3, 5),
        Arc::new(RecordingSink::new()),
        settings,
    );
    scheduler.start().await.unwrap();
    scheduler.drain().await.unwrap();
    scheduler.stop().await.unwrap();
}

async fn rig(probe_healthy: bool, auto_execute: bool, tune: impl FnOnce(&mut DecisionPolicy)) -> Rig {
    rig_with(probe_healthy, auto_execute, tune, true, |_| {}).await
}

/// `recovers` is the post-rollback verdict; `adjust` edits monitor settings.
async fn rig_with(
    probe_healthy: bool,
    auto_execute: bool,
    tune: impl FnOnce(&mut DecisionPolicy),
    recovers: bool,
    adjust: impl FnOnce(&mut MonitorSettings),
) -> Rig {
    let config = Config::default();
    let store = QueueStore::open_in_memory().await.unwrap();
    let repo = FakeRepository::new();
    let alerts = RecordingSink::new();

    let bad_tip = repo.feature("feature/regression", "src/api.rs", "broken\n");
    integrate(&store, &repo, "feature/regression").await;

    let merge_lock = MergeLock::new(store.pool().clone(), lock_settings());
    merge_lock.init().await.unwrap();
    let ledger = RollbackLedger::new(store.pool().clone());
    ledger.init().await.unwrap();
    let gatherer = ContextGatherer::new(
        store.clone(),
        Arc::new(repo.clone()),
        merge_lock.clone(),
        ledger.clone(),
        compile_patterns(&[]).unwrap(),
    );
    let executor = RollbackExecutor::new(
        Arc::new(repo.clone()),
        merge_lock,
        ledger.clone(),
        Arc::new(FixedVerifier::new(recovers)),
        Arc::new(alerts.clone()),
        VerifySettings {
            retries: 1,
            delay: Duration::ZERO,
        },
    );

    let mut policy = DecisionPolicy::from_config(&config.rollback);
    tune(&mut policy);
    let mut settings = MonitorSettings::from_config(&config);
    settings.liveness_failures = 1;
    settings.error_window = 1;
    settings.auto_execute = auto_execute;
    adjust(&mut settings);

    let probe = SwitchProbe::new(probe_healthy);
    let monitor = HealthMonitor::new(
        vec![Arc::new(probe.clone())],
        gatherer,
        ledger.clone(),
        executor,
        policy,
        Arc::new(alerts.clone()),
        settings,
    )
    .with_saturation_source(Arc::new(Saturation::default));

    Rig {
        store,
        repo,
        alerts,
        ledger,
        probe,
        monitor,
        bad_tip,
    }
}

// ============================================================================
// TICKS
// ============================================================================

#[tokio::test]
async fn test_healthy_tick_does_nothing() {
    let r = rig(true, true, |_| {}).await;
    let report = r.monitor.tick(false).await.unwrap();

    assert_eq!(report.action, MonitorAction::Healthy);
    assert!(report.signals.is_empty());
    assert!(report.decision.is_none());
    assert!(r.ledger.decisions("main", 10).await.unwrap().is_empty());
    assert!(r.alerts.events().is_empty());
    assert!(r.monitor.latest().await.is_some());
}

#[tokio::test]
async fn test_critical_failure_rolls_back_immediately() {
    let r = rig(false, true, |_| {}).await;
    let report = r.monitor.tick(false).await.unwrap();

    let decision = report.decision.clone().unwrap();
    assert_eq!(decision.recommendation, RollbackRecommendation::Immediate);
    assert!(report.decision_id.is_some());
    let MonitorAction::Executed { report: rollback } = &report.action else {
        panic!("expected an executed rollback, got {:?}", report.action);
    };
    assert_eq!(rollback.status, ExecutionStatus::Succeeded);
    assert_eq!(rollback.reverted_from, r.bad_tip);
    assert_eq!(r.repo.tip("main"), Some(rollback.revert_commit.clone()));
    assert!(!r.repo.files_at("main").contains_key("src/api.rs"));
    assert!(r.alerts.kinds().contains(&AlertKind::RollbackSucceeded));
}

#[tokio::test]
async fn test_dry_run_records_and_mutates_nothing() {
    let r = rig(false, true, |_| {}).await;
    let report = r.monitor.tick(true).await.unwrap();

    assert_eq!(report.action, MonitorAction::Recommended);
    assert!(report.decision_id.is_none());
    assert!(report.decision.is_some());
    assert!(r.ledger.decisions("main", 10).await.unwrap().is_empty());
    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));
    assert_eq!(r.repo.ref_mutations(), 1);
}

#[tokio::test]
async fn test_without_auto_execute_only_recommends() {
    let r = rig(false, false, |_| {}).await;
    let report = r.monitor.tick(false).await.unwrap();

    assert_eq!(report.action, MonitorAction::Recommended);
    assert!(report.decision_id.is_some());
    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));

    let alert = r
        .alerts
        .events()
        .into_iter()
        .find(|e| e.kind == AlertKind::RollbackRecommended)
        .unwrap();
    assert_eq!(alert.severity, AlertSeverity::Error);
}

#[tokio::test]
async fn test_medium_severity_only_watches() {
    let r = rig(false, true, cap_at_medium).await;
    let report = r.monitor.tick(false).await.unwrap();

    assert_eq!(report.action, MonitorAction::Watching);
    assert_eq!(r.alerts.kinds(), vec![AlertKind::HealthDegraded]);
    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));
}

#[tokio::test]
async fn test_recovery_cancels_scheduled_rollback() {
    let r = rig(false, true, cap_at_high).await;

    let first = r.monitor.tick(false).await.unwrap();
    let MonitorAction::Scheduled { delay_secs } = &first.action else {
        panic!("expected a scheduled rollback, got {:?}", first.action);
    };
    assert_eq!(*delay_secs, 1_800 + 30);
    assert!(r.monitor.deferred().is_pending("main").await);

    let second = r.monitor.tick(false).await.unwrap();
    assert_eq!(second.action, MonitorAction::AlreadyScheduled);
    assert_eq!(r.ledger.decisions("main", 10).await.unwrap().len(), 2);

    r.probe.set(true);
    let third = r.monitor.tick(false).await.unwrap();
    assert_eq!(third.action, MonitorAction::Recovered);
    assert!(!r.monitor.deferred().is_pending("main").await);
    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));

    let kinds = r.alerts.kinds();
    assert_eq!(kinds, vec![AlertKind::RollbackScheduled, AlertKind::RollbackCanceled]);
}

#[tokio::test]
async fn test_strongest_signal_drives_the_decision() {
    let r = rig(false, true, cap_at_high).await;
    let report = r.monitor.tick(true).await.unwrap();

    let types: Vec<FailureType> = report.signals.iter().map(|s| s.failure_type).collect();
    assert!(types.contains(&FailureType::LivenessProbeFailure));
    assert!(types.contains(&FailureType::ErrorRateSpike));
    // All HIGH: the first one derived wins the tie.
    assert_eq!(
        report.decision.map(|d| d.failure_type),
        Some(FailureType::LivenessProbeFailure)
    );
}

// ============================================================================
// AFTER A ROLLBACK
// ============================================================================

#[tokio::test]
async fn test_failed_rollback_holds_until_acknowledged() {
    let r = rig_with(false, true, |_| {}, false, |_| {}).await;

    let first = r.monitor.tick(false).await.unwrap();
    let MonitorAction::Executed { report: rollback } = &first.action else {
        panic!("expected an executed rollback, got {:?}", first.action);
    };
    assert_eq!(rollback.status, ExecutionStatus::Failed);
    let reverted = r.repo.tip("main").unwrap();

    for _ in 0..2 {
        let again = r.monitor.tick(false).await.unwrap();
        assert_eq!(
            again.action,
            MonitorAction::Held {
                execution_id: rollback.execution_id
            }
        );
    }
    assert_eq!(r.ledger.executions("main").await.unwrap().len(), 1);
    assert_eq!(r.repo.tip("main"), Some(reverted.clone()));
    let held = r
        .alerts
        .events()
        .into_iter()
        .filter(|e| e.kind == AlertKind::RollbackHeld)
        .collect::<Vec<_>>();
    assert_eq!(held.len(), 2);
    assert_eq!(held[0].severity, AlertSeverity::Critical);

    // Acknowledged, but the trunk already has the target's tree.
    r.ledger.acknowledge(rollback.execution_id).await.unwrap();
    let after_ack = r.monitor.tick(false).await.unwrap();
    assert_eq!(after_ack.action, MonitorAction::Recommended);
    assert!(!after_ack.decision.unwrap().feasible);
    assert_eq!(r.ledger.executions("main").await.unwrap().len(), 1);
    assert_eq!(r.repo.tip("main"), Some(reverted));
}

#[tokio::test]
async fn test_successful_rollback_starts_history_afresh() {
    let r = rig_with(false, true, |_| {}, true, |s| s.error_window = 10).await;

    let first = r.monitor.tick(false).await.unwrap();
    assert!(matches!(first.action, MonitorAction::Executed { .. }));

    r.probe.set(true);
    let second = r.monitor.tick(false).await.unwrap();
    assert_eq!(second.action, MonitorAction::Healthy);
    assert!(second.signals.is_empty());
    assert!(second.snapshot.error_rate_percent.abs() < f64::EPSILON);
    assert_eq!(r.ledger.executions("main").await.unwrap().len(), 1);
}

// ============================================================================
// DEFERRED ROLLBACKS
// ============================================================================

/// Long enough for a one-second timer plus its re-evaluation.
async fn let_deferred_fire() {
    tokio::time::sleep(Duration::from_millis(2_000)).await;
}

#[tokio::test]
async fn test_deferred_rollback_reevaluates_before_executing() {
    let r = rig(false, true, fire_quickly).await;
    let first = r.monitor.tick(false).await.unwrap();
    assert_eq!(first.action, MonitorAction::Scheduled { delay_secs: 1 });

    let_deferred_fire().await;

    let executions = r.ledger.executions("main").await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Succeeded);
    // Executed under the decision made when the timer fired.
    let decisions = r.ledger.decisions("main", 10).await.unwrap();
    assert_eq!(decisions.len(), 2);
    assert_eq!(executions[0].decision_id, decisions[0].id);
    assert_ne!(Some(decisions[0].id), first.decision_id);
    assert!(!r.repo.files_at("main").contains_key("src/api.rs"));
}

#[tokio::test]
async fn test_deferred_rollback_cancels_when_recovered() {
    let r = rig(false, true, fire_quickly).await;
    r.monitor.tick(false).await.unwrap();

    // Recovers without a tick in between.
    r.probe.set(true);
    let_deferred_fire().await;

    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));
    assert!(r.ledger.executions("main").await.unwrap().is_empty());
    assert!(!r.monitor.deferred().is_pending("main").await);
    let canceled = r
        .alerts
        .events()
        .into_iter()
        .find(|e| e.kind == AlertKind::RollbackCanceled)
        .unwrap();
    assert!(canceled.message.contains("health recovered"));
}

#[tokio::test]
async fn test_deferred_rollback_cancels_when_revert_point_moved() {
    let r = rig(false, true, fire_quickly).await;
    r.monitor.tick(false).await.unwrap();

    r.repo.feature("feature/next", "src/next.rs", "next\n");
    integrate(&r.store, &r.repo, "feature/next").await;
    let moved_tip = r.repo.tip("main").unwrap();
    assert_ne!(moved_tip, r.bad_tip);

    let_deferred_fire().await;

    assert_eq!(r.repo.tip("main"), Some(moved_tip));
    assert!(r.ledger.executions("main").await.unwrap().is_empty());
    let canceled = r
        .alerts
        .events()
        .into_iter()
        .find(|e| e.kind == AlertKind::RollbackCanceled)
        .unwrap();
    assert!(canceled.message.contains("revert point moved"));
}

#[tokio::test]
async fn test_deferred_rollback_respects_hold() {
    let r = rig(false, true, fire_quickly).await;
    let first = r.monitor.tick(false).await.unwrap();
    assert!(matches!(first.action, MonitorAction::Scheduled { .. }));

    // A manual rollback for another decision failed in the meantime.
    let decision_id = first.decision_id.unwrap();
    let failed = r
        .ledger
        .begin_execution(decision_id, "main", "refs/trunkguard/backup/main/manual", &r.bad_tip)
        .await
        .unwrap();
    r.ledger
        .finish_execution(failed, ExecutionStatus::Failed, None, Some("still unhealthy"))
        .await
        .unwrap();

    let_deferred_fire().await;

    assert_eq!(r.repo.tip("main"), Some(r.bad_tip.clone()));
    assert_eq!(r.ledger.executions("main").await.unwrap().len(), 1);
    assert!(r.alerts.kinds().contains(&AlertKind::RollbackHeld));
}

// ============================================================================
// PROBES AND VERIFICATION
// ============================================================================

#[tokio::test]
async fn test_probe_verifier_follows_probes() {
    let probe = SwitchProbe::new(false);
    let verifier = ProbeVerifier::new(vec![Arc::new(probe.clone())]);
    assert!(!verifier.is_healthy().await.unwrap());
    probe.set(true);
    assert!(verifier.is_healthy().await.unwrap());
}

#[tokio::test]
async fn test_command_probe_reports_exit_status() {
    let up = CommandProbe::new("up", "exit 0", Duration::from_secs(5)).check().await;
    assert!(up.passed);
    assert_eq!(up.code, Some(0));

    let down = CommandProbe::new("down", "exit 3", Duration::from_secs(5)).check().await;
    assert!(!down.passed);
    assert_eq!(down.code, Some(3));
    assert_eq!(down.name, "down");
}
