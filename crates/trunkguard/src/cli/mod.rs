//! CLI definition and dispatch

pub mod commands;
pub mod handlers;

pub use commands::build_cli;

/// Whether a `git` executable is on `PATH`.
pub fn is_git_installed() -> bool {
    which::which("git").is_ok()
}
