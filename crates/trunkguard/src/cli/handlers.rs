//! Bridges `clap` matches to command implementations

use std::process;

use anyhow::Result;
use clap::ArgMatches;
use trunkguard_core::{
    output::{ErrorPayload, SchemaEnvelope},
    Error,
};

use crate::{
    cli::commands::build_cli,
    commands::{health, precheck, queue, rollback, scheduler, AppContext},
};

/// Format an error for user display (no stack traces)
pub fn format_error(err: &anyhow::Error) -> String {
    let msg = err.to_string();
    if let Some(source) = err.source() {
        let source_msg = source.to_string();
        if !msg.contains(&source_msg) && !source_msg.is_empty() {
            return format!("{msg}\nCause: {source_msg}");
        }
    }
    msg
}

/// Exit code for an error: the core category code, or 1 for anything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<Error>().map_or(1, Error::exit_code)
}

/// Print a failed command as an `error-response` envelope.
pub fn print_json_error(err: &anyhow::Error) {
    let envelope = err.downcast_ref::<Error>().map_or_else(
        || SchemaEnvelope::<ErrorPayload>::error(&Error::unknown(format_error(err))),
        SchemaEnvelope::<ErrorPayload>::error,
    );
    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize error response"),
    }
}

async fn dispatch(name: &str, sub_m: &ArgMatches) -> Result<()> {
    let repo = sub_m.get_one::<String>("repo").map(String::as_str);
    let ctx = AppContext::open(repo).await?;

    match name {
        "submit" => queue::run_submit(&ctx, sub_m).await,
        "status" => queue::run_status(&ctx, sub_m).await,
        "list" => queue::run_list(&ctx, sub_m).await,
        "cancel" => queue::run_cancel(&ctx, sub_m).await,
        "requeue" => queue::run_requeue(&ctx, sub_m).await,
        "stats" => queue::run_stats(&ctx, sub_m).await,
        "precheck" => precheck::run(&ctx, sub_m).await,
        "run-scheduler" => scheduler::run(&ctx, sub_m).await,
        "run-health-monitor" => health::run(&ctx, sub_m).await,
        "evaluate-rollback" => rollback::run_evaluate(&ctx, sub_m).await,
        "rollback" => rollback::run_execute(&ctx, sub_m).await,
        "rollback-history" => rollback::run_history(&ctx, sub_m).await,
        "rollback-ack" => rollback::run_ack(&ctx, sub_m).await,
        other => Err(anyhow::anyhow!("Unknown command: {other}")),
    }
}

/// Parse arguments and run the selected command.
///
/// Returns whether JSON output was requested alongside the result, so the
/// caller can render errors in the same format.
pub async fn run_cli() -> (bool, Result<()>) {
    let matches = match build_cli().try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            use clap::error::ErrorKind;
            let should_exit_zero =
                matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
            let _ = e.print();
            #[allow(clippy::exit)]
            process::exit(if should_exit_zero { 0 } else { 2 });
        }
    };

    let Some((name, sub_m)) = matches.subcommand() else {
        return (false, Err(anyhow::anyhow!("No command given")));
    };
    let json = sub_m.get_flag("json");
    (json, dispatch(name, sub_m).await)
}
