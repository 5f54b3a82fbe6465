//! System error types for IO, repository commands and network delivery.
//!
//! These errors represent failures in operations that are typically
//! out of the user's direct control.

use std::fmt;

/// System errors represent failures in IO, external commands, or the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemError {
    /// IO operation failed
    IoError(String),
    /// External command could not be spawned or waited on
    Command(String),
    /// A repository operation exited unsuccessfully
    Repository { operation: String, stderr: String },
    /// Network failure talking to a remote or an HTTP endpoint
    Network(String),
    /// The remote refused the trunk update
    PushRejected { target: String, reason: String },
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(msg) => write!(f, "IO error: {msg}"),
            Self::Command(msg) => write!(f, "Command error: {msg}"),
            Self::Repository { operation, stderr } => {
                write!(f, "Repository operation '{operation}' failed: {stderr}")
            }
            Self::Network(msg) => write!(f, "Network error: {msg}"),
            Self::PushRejected { target, reason } => {
                write!(f, "Push to '{target}' rejected: {reason}")
            }
        }
    }
}

impl SystemError {
    /// Get exit code for system errors (always 2).
    pub const fn exit_code(&self) -> i32 {
        2
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::IoError(_) => "IO_ERROR",
            Self::Command(_) => "COMMAND_ERROR",
            Self::Repository { .. } => "REPOSITORY_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::PushRejected { .. } => "PUSH_REJECTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_display_includes_operation() {
        let err = SystemError::Repository {
            operation: "merge-base".to_string(),
            stderr: "fatal: bad revision".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Repository operation 'merge-base' failed: fatal: bad revision"
        );
    }

    #[test]
    fn test_push_rejected_display() {
        let err = SystemError::PushRejected {
            target: "main".to_string(),
            reason: "stale info".to_string(),
        };
        assert_eq!(err.to_string(), "Push to 'main' rejected: stale info");
    }

    #[test]
    fn test_system_exit_code() {
        assert_eq!(SystemError::IoError("x".to_string()).exit_code(), 2);
        assert_eq!(SystemError::Network("x".to_string()).exit_code(), 2);
    }
}
