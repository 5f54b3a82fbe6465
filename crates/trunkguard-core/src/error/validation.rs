//! Validation error types for requests and configuration.
//!
//! These errors represent user input or configuration problems that can be
//! corrected by the user. A request failing validation is never queued.

use std::fmt;

/// Validation errors represent incorrect user input or configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid configuration provided
    InvalidConfig(String),
    /// Parse error when reading configuration or data
    ParseError(String),
    /// Malformed integration request
    InvalidRequest(String),
    /// Branch does not exist in the repository
    BranchNotFound { branch: String },
    /// Source branch has no commits that the target lacks
    NothingToIntegrate { source: String, target: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            Self::BranchNotFound { branch } => write!(f, "Branch '{branch}' does not exist"),
            Self::NothingToIntegrate { source, target } => write!(
                f,
                "Nothing to integrate: '{source}' has no commits that '{target}' does not already contain"
            ),
        }
    }
}

impl ValidationError {
    /// Get exit code for validation errors (always 1).
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::BranchNotFound { .. } => "BRANCH_NOT_FOUND",
            Self::NothingToIntegrate { .. } => "NOTHING_TO_INTEGRATE",
        }
    }
}
