//! trunkguard CLI - serialized trunk integration and automatic rollback
//!
//! Binary name: `trunkguard`

use std::process;

mod cli;
mod commands;

use cli::handlers::{exit_code, format_error, print_json_error, run_cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TRUNKGUARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if !cli::is_git_installed() {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: trunkguard requires git on PATH");
        }
        #[allow(clippy::exit)]
        process::exit(2);
    }

    let (json, result) = run_cli().await;
    if let Err(err) = result {
        if json {
            print_json_error(&err);
        }
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {}", format_error(&err));
        }

        #[allow(clippy::exit)]
        process::exit(exit_code(&err));
    }
}
