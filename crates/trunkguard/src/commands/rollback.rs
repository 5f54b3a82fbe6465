//! Rollback commands: evaluate, execute a recorded decision, history, acknowledge.

use std::sync::Arc;

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;
use trunkguard_core::{
    health::{build_probes, ProbeVerifier},
    rollback::{
        analyze, DecisionPolicy, FailureType, RollbackDecision, RollbackExecution,
        RollbackExecutor, RollbackReport, StoredDecision, VerifySettings,
    },
    Error,
};

use super::{emit, format_of, AppContext};

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateOutput {
    pub trunk: String,
    /// Set when the decision was appended to the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<i64>,
    pub decision: RollbackDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryOutput {
    pub trunk: String,
    pub decisions: Vec<StoredDecision>,
    pub executions: Vec<RollbackExecution>,
}

fn print_decision(decision: &RollbackDecision) {
    println!("  failure:        {} ({:.1})", decision.failure_type, decision.magnitude);
    println!("  severity:       {}", decision.severity);
    println!("  recommendation: {}", decision.recommendation);
    println!("  confidence:     {}%", decision.confidence);
    if let Some(target) = &decision.target_version {
        println!("  revert to:      {}", target.short());
    }
    if decision.recommendation.is_actionable() {
        println!("  window:         {}s", decision.rollback_window_secs);
    }
    println!("  feasible:       {}", decision.feasible);
    for reason in &decision.blocking_reasons {
        println!("    blocked: {reason}");
    }
    for warning in &decision.warnings {
        println!("    warning: {warning}");
    }
}

pub async fn run_evaluate(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let raw_type = matches
        .get_one::<String>("failure-type")
        .ok_or_else(|| anyhow::anyhow!("Failure type is required"))?;
    let failure_type: FailureType = raw_type.parse().map_err(|_| {
        Error::invalid_request(format!(
            "unknown failure type '{raw_type}'; expected one of: {}",
            FailureType::all()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let magnitude = matches.get_one::<f64>("magnitude").copied().unwrap_or(0.0);
    let target = matches.get_one::<String>("target-version").map(String::as_str);

    let trunk = ctx.trunk().to_string();
    let context = ctx.gatherer().await?.gather(&trunk, magnitude, target).await?;
    let decision = analyze(
        failure_type,
        &context,
        &DecisionPolicy::from_config(&ctx.config.rollback),
    );
    let decision_id = if matches.get_flag("record") {
        Some(ctx.ledger().await?.record_decision(&trunk, &decision).await?)
    } else {
        None
    };

    let output = EvaluateOutput {
        trunk,
        decision_id,
        decision,
    };
    emit(format_of(matches), "evaluate-rollback-response", &output, |out| {
        match out.decision_id {
            Some(id) => println!("Decision {id} for '{}':", out.trunk),
            None => println!("Decision for '{}' (not recorded):", out.trunk),
        }
        print_decision(&out.decision);
    })
}

pub async fn run_execute(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let decision_id = matches
        .get_one::<i64>("decision")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Decision id is required"))?;

    let ledger = ctx.ledger().await?;
    let stored = ledger.decision(decision_id).await?;
    let probes = build_probes(&ctx.config.health.probes);
    let executor = RollbackExecutor::new(
        Arc::clone(&ctx.repo),
        ctx.merge_lock().await?,
        ledger,
        Arc::new(ProbeVerifier::new(probes)),
        Arc::clone(&ctx.alerts),
        VerifySettings::from_config(&ctx.config.rollback),
    );

    let report: RollbackReport = executor
        .execute(&stored.trunk, decision_id, &stored.decision)
        .await?;
    emit(format_of(matches), "rollback-response", &report, |r| {
        println!("Rollback {} of '{}': {}", r.execution_id, r.trunk, r.status);
        println!("  reverted:  {} -> {}", r.reverted_from.short(), r.target_version.short());
        println!("  commit:    {}", r.revert_commit.short());
        println!("  backup:    {}", r.backup_ref);
        println!("  verified:  {} check(s)", r.verify_attempts);
    })
}

pub async fn run_history(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let limit = matches.get_one::<u32>("limit").copied().unwrap_or(20);
    let trunk = ctx.trunk().to_string();
    let ledger = ctx.ledger().await?;
    let decisions = ledger.decisions(&trunk, limit).await?;
    let executions = ledger.executions(&trunk).await?;

    let output = HistoryOutput {
        trunk,
        decisions,
        executions,
    };
    emit(format_of(matches), "rollback-history-response", &output, |out| {
        if out.decisions.is_empty() {
            println!("No rollback decisions for '{}'", out.trunk);
        }
        for stored in &out.decisions {
            let d = &stored.decision;
            println!(
                "#{:<4} {}  {} {} -> {}{}",
                stored.id,
                d.evaluated_at.format("%Y-%m-%d %H:%M:%S"),
                d.severity,
                d.failure_type,
                d.recommendation,
                if d.feasible { "" } else { " (blocked)" }
            );
        }
        for execution in &out.executions {
            println!(
                "  execution {} for decision {}: {}{}",
                execution.id,
                execution.decision_id,
                execution.status,
                execution
                    .message
                    .as_deref()
                    .map_or_else(String::new, |m| format!(" ({m})"))
            );
        }
    })
}

pub async fn run_ack(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let execution_id = matches
        .get_one::<i64>("execution")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Execution id is required"))?;

    let execution = ctx.ledger().await?.acknowledge(execution_id).await?;
    tracing::info!(execution_id, trunk = %execution.trunk, "Failed rollback acknowledged");
    emit(format_of(matches), "rollback-ack-response", &execution, |e| {
        println!("Execution {} on '{}' acknowledged; automatic rollback resumed", e.id, e.trunk);
    })
}
