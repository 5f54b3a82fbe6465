//! CLI command definitions using `clap`

use clap::{Arg, ArgAction, Command as ClapCommand};

pub fn after_help_text(examples: &[&str]) -> String {
    let mut text = String::from("EXAMPLES:\n");
    for example in examples {
        text.push_str("  ");
        text.push_str(example);
        text.push('\n');
    }
    text
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn id_arg() -> Arg {
    Arg::new("id")
        .required(true)
        .value_name("REQUEST_ID")
        .help("Integration request id")
}

fn target_arg() -> Arg {
    Arg::new("target")
        .long("target")
        .short('t')
        .value_name("BRANCH")
        .help("Target branch (defaults to the configured trunk)")
}

pub fn cmd_submit() -> ClapCommand {
    ClapCommand::new("submit")
        .about("Submit a branch for integration into the trunk")
        .arg(
            Arg::new("source")
                .required(true)
                .value_name("BRANCH")
                .help("Branch to integrate"),
        )
        .arg(target_arg())
        .arg(
            Arg::new("requester")
                .long("requester")
                .short('r')
                .value_name("ID")
                .help("Requesting session (defaults to $USER)"),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .short('p')
                .value_name("N")
                .value_parser(clap::value_parser!(i32))
                .help("Lower runs first; equal priorities keep submission order"),
        )
        .arg(json_arg())
        .after_help(after_help_text(&[
            "trunkguard submit feature/login                  Queue feature/login for main",
            "trunkguard submit fix/typo --target release     Queue against another branch",
            "trunkguard submit feature/x --json              Print the queued entry as JSON",
        ]))
}

pub fn cmd_status() -> ClapCommand {
    ClapCommand::new("status")
        .about("Show one request with its transition history")
        .arg(id_arg())
        .arg(json_arg())
}

pub fn cmd_list() -> ClapCommand {
    ClapCommand::new("list")
        .about("List queue entries in processing order")
        .arg(
            Arg::new("status")
                .long("status")
                .short('s')
                .value_name("STATUS")
                .action(ArgAction::Append)
                .help("Only entries in this status (repeatable)"),
        )
        .arg(target_arg().help("Only entries for this target branch"))
        .arg(
            Arg::new("requester")
                .long("requester")
                .short('r')
                .value_name("ID")
                .help("Only entries from this requester"),
        )
        .arg(
            Arg::new("active")
                .long("active")
                .action(ArgAction::SetTrue)
                .help("Hide merged, failed and canceled entries"),
        )
        .arg(json_arg())
        .after_help(after_help_text(&[
            "trunkguard list                          Everything, oldest first",
            "trunkguard list --active                 Pending and in-flight entries",
            "trunkguard list -s manual_required       Requests waiting on a human",
        ]))
}

pub fn cmd_cancel() -> ClapCommand {
    ClapCommand::new("cancel")
        .about("Cancel a QUEUED or MANUAL_REQUIRED request")
        .arg(id_arg())
        .arg(
            Arg::new("requester")
                .long("requester")
                .short('r')
                .value_name("ID")
                .help("Only cancel if the request belongs to this requester"),
        )
        .arg(json_arg())
}

pub fn cmd_requeue() -> ClapCommand {
    ClapCommand::new("requeue")
        .about("Put a MANUAL_REQUIRED request back in the queue after resolving conflicts")
        .arg(id_arg())
        .arg(json_arg())
}

pub fn cmd_precheck() -> ClapCommand {
    ClapCommand::new("precheck")
        .about("Predict merge conflicts without touching any ref")
        .arg(
            Arg::new("source")
                .required(true)
                .value_name("BRANCH")
                .help("Branch to check"),
        )
        .arg(target_arg())
        .arg(json_arg())
}

pub fn cmd_stats() -> ClapCommand {
    ClapCommand::new("stats")
        .about("Queue totals and average wait and merge times")
        .arg(json_arg())
}

pub fn cmd_run_scheduler() -> ClapCommand {
    ClapCommand::new("run-scheduler")
        .about("Run the integration scheduler in the foreground")
        .long_about(
            "Run the single-consumer integration loop. Only one scheduler may run
per queue; a second one exits with LOCK_HELD. SIGINT finishes the current
request and releases the processor lock.",
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Process until the queue is empty, then exit"),
        )
        .arg(json_arg())
}

pub fn cmd_run_health_monitor() -> ClapCommand {
    ClapCommand::new("run-health-monitor")
        .about("Sample deployment health and drive rollbacks")
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Take a single sample and exit"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .requires("once")
                .help("Report the decision without recording or executing it"),
        )
        .arg(json_arg())
}

pub fn cmd_evaluate_rollback() -> ClapCommand {
    ClapCommand::new("evaluate-rollback")
        .about("Evaluate a failure signal without executing anything")
        .arg(
            Arg::new("failure-type")
                .required(true)
                .value_name("TYPE")
                .help("liveness-probe-failure | slo-violation | error-rate-spike | performance-degradation | deployment-failure"),
        )
        .arg(
            Arg::new("magnitude")
                .long("magnitude")
                .short('m')
                .value_name("PERCENT")
                .value_parser(clap::value_parser!(f64))
                .default_value("0")
                .help("Observed magnitude in the failure type's unit"),
        )
        .arg(
            Arg::new("target-version")
                .long("target-version")
                .value_name("REV")
                .help("Revert point (defaults to the trunk before the last integration)"),
        )
        .arg(
            Arg::new("record")
                .long("record")
                .action(ArgAction::SetTrue)
                .help("Append the decision to the ledger so it can be executed later"),
        )
        .arg(json_arg())
        .after_help(after_help_text(&[
            "trunkguard evaluate-rollback error-rate-spike -m 60",
            "trunkguard evaluate-rollback deployment-failure --record --json",
        ]))
}

pub fn cmd_rollback() -> ClapCommand {
    ClapCommand::new("rollback")
        .about("Execute a recorded rollback decision")
        .arg(
            Arg::new("decision")
                .required(true)
                .value_name("DECISION_ID")
                .value_parser(clap::value_parser!(i64))
                .help("Id printed by evaluate-rollback --record"),
        )
        .arg(json_arg())
}

pub fn cmd_rollback_history() -> ClapCommand {
    ClapCommand::new("rollback-history")
        .about("Recent rollback decisions and executions for the trunk")
        .arg(
            Arg::new("limit")
                .long("limit")
                .short('n')
                .value_name("N")
                .value_parser(clap::value_parser!(u32))
                .default_value("20")
                .help("Maximum decisions to show"),
        )
        .arg(json_arg())
}

pub fn cmd_rollback_ack() -> ClapCommand {
    ClapCommand::new("rollback-ack")
        .about("Acknowledge a failed rollback and resume automatic rollbacks")
        .arg(
            Arg::new("execution")
                .required(true)
                .value_name("EXECUTION_ID")
                .value_parser(clap::value_parser!(i64))
                .help("Id of the FAILED execution shown by rollback-history"),
        )
        .arg(json_arg())
}

pub fn build_cli() -> ClapCommand {
    ClapCommand::new("trunkguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serialized trunk integration with conflict precheck and automatic rollback")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("repo")
                .long("repo")
                .short('C')
                .global(true)
                .value_name("PATH")
                .help("Repository root (defaults to the current directory)"),
        )
        .subcommand(cmd_submit())
        .subcommand(cmd_status())
        .subcommand(cmd_list())
        .subcommand(cmd_cancel())
        .subcommand(cmd_requeue())
        .subcommand(cmd_precheck())
        .subcommand(cmd_stats())
        .subcommand(cmd_run_scheduler())
        .subcommand(cmd_run_health_monitor())
        .subcommand(cmd_evaluate_rollback())
        .subcommand(cmd_rollback())
        .subcommand(cmd_rollback_history())
        .subcommand(cmd_rollback_ack())
}
