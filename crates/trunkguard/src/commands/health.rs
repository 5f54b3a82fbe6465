//! `run-health-monitor`: sample health and act on rollback decisions.

use std::sync::Arc;

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;
use trunkguard_core::{
    health::{build_probes, HealthMonitor, MonitorAction, MonitorSettings, ProbeVerifier, TickReport},
    rollback::{DecisionPolicy, RollbackExecutor, VerifySettings},
    shutdown::ShutdownCoordinator,
};

use super::{emit, format_of, AppContext};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorRunOutput {
    pub ticks: u64,
}

fn print_tick(report: &TickReport) {
    let snapshot = &report.snapshot;
    for probe in &snapshot.probes {
        let state = if probe.passed { "ok" } else { "FAIL" };
        let detail = probe.detail.as_deref().unwrap_or("");
        println!("  {:<4} {} ({}ms) {detail}", state, probe.name, probe.latency_ms);
    }
    println!("  error rate:       {:.1}%", snapshot.error_rate_percent);
    println!("  SLO budget left:  {:.1}%", snapshot.slo_budget_remaining_percent);
    if let Some(saturation) = snapshot.saturation.percent() {
        println!("  saturation:       {saturation:.1}%");
    }
    if let Some(decision) = &report.decision {
        println!(
            "  decision: {} {} -> {} (confidence {}%)",
            decision.severity, decision.failure_type, decision.recommendation, decision.confidence
        );
        for reason in &decision.blocking_reasons {
            println!("    blocked: {reason}");
        }
    }
    let action = match &report.action {
        MonitorAction::Healthy => "healthy".to_string(),
        MonitorAction::Recovered => "recovered; scheduled rollback canceled".to_string(),
        MonitorAction::Watching => "degraded; watching".to_string(),
        MonitorAction::Executed { report } => {
            format!("rolled back ({}), revert {}", report.status, report.revert_commit.short())
        }
        MonitorAction::ExecutionFailed { error } => format!("rollback failed: {error}"),
        MonitorAction::Recommended => "rollback recommended, not executed".to_string(),
        MonitorAction::Scheduled { delay_secs } => format!("rollback scheduled in {delay_secs}s"),
        MonitorAction::AlreadyScheduled => "rollback already scheduled".to_string(),
        MonitorAction::Canceled { reason } => format!("scheduled rollback canceled: {reason}"),
        MonitorAction::Held { execution_id } => {
            format!("rollback on hold until execution {execution_id} is acknowledged")
        }
    };
    println!("  action: {action}");
}

pub async fn run(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let probes = build_probes(&ctx.config.health.probes);
    if probes.is_empty() {
        tracing::warn!("No health probes configured; only saturation is sampled");
    }

    let executor = RollbackExecutor::new(
        Arc::clone(&ctx.repo),
        ctx.merge_lock().await?,
        ctx.ledger().await?,
        Arc::new(ProbeVerifier::new(probes.clone())),
        Arc::clone(&ctx.alerts),
        VerifySettings::from_config(&ctx.config.rollback),
    );
    let monitor = HealthMonitor::new(
        probes,
        ctx.gatherer().await?,
        ctx.ledger().await?,
        executor,
        DecisionPolicy::from_config(&ctx.config.rollback),
        Arc::clone(&ctx.alerts),
        MonitorSettings::from_config(&ctx.config),
    );

    if matches.get_flag("once") {
        let report = monitor.tick(matches.get_flag("dry-run")).await?;
        if let (MonitorAction::Scheduled { .. }, Some(id)) = (&report.action, report.decision_id) {
            tracing::warn!(
                decision_id = id,
                "Exiting before the scheduled rollback fires; run `trunkguard rollback {id}` to execute it"
            );
        }
        return emit(format_of(matches), "health-response", &report, |r| {
            println!("Health of '{}' at {}", ctx.trunk(), r.snapshot.taken_at.format("%Y-%m-%d %H:%M:%S"));
            print_tick(r);
        });
    }

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen_for_signals()?;
    let ticks = monitor.run(shutdown.subscribe()).await?;
    emit(format_of(matches), "health-response", &MonitorRunOutput { ticks }, |out| {
        println!("Health monitor stopped after {} sample(s)", out.ticks);
    })
}
