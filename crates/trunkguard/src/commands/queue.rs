//! Queue commands: submit, status, list, cancel, requeue, stats.

use anyhow::Result;
use clap::ArgMatches;
use itertools::Itertools;
use serde::Serialize;
use trunkguard_core::{
    coordination::{
        cancel, requeue, submit, IntegrationStatus, QueueEntry, QueueEvent, QueueFilter,
        QueueStats, RequestId, SubmitRequest,
    },
};

use super::{emit, format_of, AppContext};

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutput {
    pub entry: QueueEntry,
    /// 1-based place among QUEUED entries.
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOutput {
    pub entry: QueueEntry,
    pub position: Option<usize>,
    pub events: Vec<QueueEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListOutput {
    pub entries: Vec<QueueEntry>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryOutput {
    pub entry: QueueEntry,
    pub message: String,
}

fn requester_from_env() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn request_id(matches: &ArgMatches) -> Result<RequestId> {
    let raw = matches
        .get_one::<String>("id")
        .ok_or_else(|| anyhow::anyhow!("Request id is required"))?;
    Ok(raw.parse()?)
}

fn describe(entry: &QueueEntry) -> String {
    format!(
        "{}  {:<17} {} -> {}  ({}, priority {})",
        entry.id,
        entry.status.as_str(),
        entry.source_branch,
        entry.target_branch,
        entry.requester_id,
        entry.priority
    )
}

pub async fn run_submit(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let source = matches
        .get_one::<String>("source")
        .ok_or_else(|| anyhow::anyhow!("Source branch is required"))?;
    let target = matches
        .get_one::<String>("target")
        .map_or_else(|| ctx.trunk().to_string(), Clone::clone);
    let requester = matches
        .get_one::<String>("requester")
        .cloned()
        .unwrap_or_else(requester_from_env);

    let mut request = SubmitRequest::new(source, target, requester);
    if let Some(priority) = matches.get_one::<i32>("priority") {
        request = request.with_priority(*priority);
    }

    let entry = submit(
        &ctx.store,
        ctx.repo.as_ref(),
        request,
        ctx.config.queue.default_priority,
    )
    .await?;
    let position = ctx.store.position(entry.id).await?;

    emit(
        format_of(matches),
        "submit-response",
        &SubmitOutput { entry, position },
        |out| {
            println!("Queued {}", out.entry.id);
            println!("  {} -> {}", out.entry.source_branch, out.entry.target_branch);
            if let Some(position) = out.position {
                println!("  Position: {position}");
            }
        },
    )
}

pub async fn run_status(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let id = request_id(matches)?;
    let entry = ctx.store.get(id).await?;
    let position = ctx.store.position(id).await?;
    let events = ctx.store.events(id).await?;

    emit(
        format_of(matches),
        "status-response",
        &StatusOutput {
            entry,
            position,
            events,
        },
        |out| {
            println!("{}", describe(&out.entry));
            if let Some(position) = out.position {
                println!("  Position: {position}");
            }
            if let Some(report) = out.entry.conflict_report.as_ref().filter(|r| !r.is_clean()) {
                println!("  Conflicts ({}): {}", report.recommendation, report.files.join(", "));
            }
            if let Some(error) = &out.entry.last_error {
                println!("  Error: {error}");
            }
            for event in &out.events {
                let from = event.from_status.map_or("-", |s| s.as_str());
                let message = event.message.as_deref().unwrap_or("");
                println!("  {}  {from} -> {}  {message}", event.at.format("%Y-%m-%d %H:%M:%S"), event.to_status);
            }
        },
    )
}

pub async fn run_list(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let mut filter = QueueFilter::new();
    if let Some(statuses) = matches.get_many::<String>("status") {
        for raw in statuses {
            filter = filter.with_status(raw.parse::<IntegrationStatus>()?);
        }
    }
    if let Some(target) = matches.get_one::<String>("target") {
        filter = filter.with_target(target);
    }
    if let Some(requester) = matches.get_one::<String>("requester") {
        filter = filter.with_requester(requester);
    }
    if matches.get_flag("active") {
        filter = filter.active_only();
    }

    let entries = ctx.store.list(|entry| filter.matches(entry)).await?;
    let total = entries.len();

    emit(
        format_of(matches),
        "list-response",
        &ListOutput { entries, total },
        |out| {
            if out.entries.is_empty() {
                println!("Queue is empty");
                return;
            }
            println!("{}", out.entries.iter().map(describe).join("\n"));
        },
    )
}

pub async fn run_cancel(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let id = request_id(matches)?;
    let requester = matches.get_one::<String>("requester").map(String::as_str);
    let entry = cancel(&ctx.store, id, requester).await?;
    let message = format!("Canceled {id}");

    emit(
        format_of(matches),
        "cancel-response",
        &EntryOutput { entry, message },
        |out| println!("{}", out.message),
    )
}

pub async fn run_requeue(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let id = request_id(matches)?;
    let entry = requeue(&ctx.store, id).await?;
    let position = ctx.store.position(id).await?;
    let message = position.map_or_else(
        || format!("Requeued {id}"),
        |p| format!("Requeued {id} at position {p}"),
    );

    emit(
        format_of(matches),
        "requeue-response",
        &EntryOutput { entry, message },
        |out| println!("{}", out.message),
    )
}

pub async fn run_stats(ctx: &AppContext, matches: &ArgMatches) -> Result<()> {
    let stats: QueueStats = ctx.store.stats().await?;

    emit(format_of(matches), "stats-response", &stats, |s| {
        println!("Total:           {}", s.total);
        println!("Queued:          {}", s.queued);
        println!("In flight:       {}", s.in_flight);
        println!("Manual required: {}", s.manual_required);
        println!("Merged:          {}", s.merged);
        println!("Failed:          {}", s.failed);
        println!("Canceled:        {}", s.canceled);
        println!("Avg wait:        {}ms", s.avg_wait_ms);
        println!("Avg merge:       {}ms", s.avg_merge_ms);
    })
}
