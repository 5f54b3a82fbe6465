//! `run-scheduler`: the integration loop in the foreground.

use std::sync::Arc;

use anyhow::Result;
use clap::ArgMatches;
use serde::Serialize;
use trunkguard_core::{
    coordination::{Processed, RequestId, RunSummary, Scheduler},
    shutdown::ShutdownCoordinator,
};

use super::{emit, format_of, AppContext};

#[derive(Debug, Clone, Serialize)]
pub struct DrainOutput {
    /// Entries found mid-flight from a previous run and put back in the queue.
    pub recovered: Vec<RequestId>,
    pub processed: Vec<Processed>,
}

fn describe(processed: &Processed) -> String {
    match processed {
        Processed::Merged { id, fast_forward } => {
            let how = if *fast_forward { "fast-forward" } else { "merge commit" };
            format!("{id}  merged ({how})")
        }
        Processed::AlreadyIntegrated { id } => format!("{id}  already integrated"),
        Processed::Requeued { id, reason } => format!("{id}  requeued: {reason}"),
        Processed::Rebased { id, retry_count } => format!("{id}  rebased (retry {retry_count}), requeued"),
        Processed::ManualRequired { id, files } => {
            format!("{id}  manual resolution required: {}", files.join(", "))
        }
        Processed::Failed { id, error } => format!("{id}  failed: {error}"),
    }
}

pub async fn run(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let scheduler = Scheduler::from_config(
        &ctx.config,
        ctx.store.clone(),
        Arc::clone(&ctx.repo),
        Arc::clone(&ctx.alerts),
    );

    if matches.get_flag("once") {
        let recovered = scheduler.start().await?;
        let drained = scheduler.drain().await;
        if let Err(e) = scheduler.stop().await {
            tracing::warn!(error = %e, "Failed to release processor lock");
        }
        let output = DrainOutput {
            recovered,
            processed: drained?,
        };
        return emit(format_of(matches), "scheduler-response", &output, |out| {
            for id in &out.recovered {
                println!("{id}  recovered from an interrupted run");
            }
            if out.processed.is_empty() {
                println!("Nothing to process");
            }
            for processed in &out.processed {
                println!("{}", describe(processed));
            }
        });
    }

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen_for_signals()?;
    let summary: RunSummary = scheduler.run(shutdown.subscribe()).await?;
    emit(format_of(matches), "scheduler-response", &summary, |s| {
        println!(
            "Processed {} request(s): {} merged, {} requeued, {} manual, {} failed",
            s.iterations, s.merged, s.requeued, s.manual, s.failed
        );
    })
}
