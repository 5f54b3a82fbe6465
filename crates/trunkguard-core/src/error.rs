//! Error types for trunkguard with categorization:
//!
//! - **Validation errors**: malformed requests and configuration (exit code 1)
//! - **System errors**: IO, repository commands, network (exit code 2)
//! - **Execution errors**: database, locks, lifecycle state (exit code 3 or 4)
//!
//! Orthogonal to the category, [`Error::is_transient`] tells the scheduler
//! whether an entry should be left queued for another attempt.

pub mod execution;
pub mod system;
pub mod validation;

pub use execution::ExecutionError;
use std::fmt;
pub use system::SystemError;
pub use validation::ValidationError;

/// Every failure the queue, repository client and rollback engine can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Rejected request or configuration; nothing was stored
    Validation(ValidationError),
    /// System error from IO, repository commands or the network
    System(SystemError),
    /// Execution error from the queue, locks or rollback state
    Execution(ExecutionError),
    /// Anything that fits no other category
    Unknown(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

// Convenience constructors
impl Error {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidConfig(msg.into()))
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::ParseError(msg.into()))
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidRequest(msg.into()))
    }

    pub fn branch_not_found(branch: impl Into<String>) -> Self {
        Self::Validation(ValidationError::BranchNotFound {
            branch: branch.into(),
        })
    }

    pub fn nothing_to_integrate(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Validation(ValidationError::NothingToIntegrate {
            source: source.into(),
            target: target.into(),
        })
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::System(SystemError::IoError(msg.into()))
    }

    pub fn command_error(msg: impl Into<String>) -> Self {
        Self::System(SystemError::Command(msg.into()))
    }

    /// Create a system error from a failed repository operation.
    pub fn repository(operation: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::System(SystemError::Repository {
            operation: operation.into(),
            stderr: stderr.into(),
        })
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::System(SystemError::Network(msg.into()))
    }

    pub fn push_rejected(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::System(SystemError::PushRejected {
            target: target.into(),
            reason: reason.into(),
        })
    }

    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::DatabaseError(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::NotFound(msg.into()))
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::InvalidTransition(msg.into()))
    }

    pub fn lock_timeout(resource: impl Into<String>, waited_ms: u64) -> Self {
        Self::Execution(ExecutionError::LockTimeout {
            resource: resource.into(),
            waited_ms,
        })
    }

    pub fn lock_held(resource: impl Into<String>, holder: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::LockHeld {
            resource: resource.into(),
            holder: holder.into(),
        })
    }

    pub fn not_requester(id: impl Into<String>, requester: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::NotRequester {
            id: id.into(),
            requester: requester.into(),
        })
    }

    pub fn rollback_infeasible(reasons: Vec<String>) -> Self {
        Self::Execution(ExecutionError::RollbackInfeasible { reasons })
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::System(err) => write!(f, "{err}"),
            Self::Execution(err) => write!(f, "{err}"),
            Self::Unknown(msg) => write!(f, "Unknown error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Process exit status for the CLI.
    ///
    /// - 1: rejected request or configuration
    /// - 2: git, IO or network failure
    /// - 3: Not found (requests, decisions)
    /// - 4: Invalid state (lifecycle violations, lock contention, infeasible rollback)
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(err) => err.exit_code(),
            Self::System(err) => err.exit_code(),
            Self::Execution(err) => err.exit_code(),
            Self::Unknown(_) => 2,
        }
    }

    /// Stable machine-readable code, e.g. `LOCK_TIMEOUT`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(err) => err.code(),
            Self::System(err) => err.code(),
            Self::Execution(err) => err.code(),
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Transient errors leave a queue entry `QUEUED`; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Execution(
                ExecutionError::LockTimeout { .. } | ExecutionError::LockHeld { .. },
            )
            | Self::System(SystemError::Network(_) | SystemError::IoError(_)) => true,
            Self::Execution(ExecutionError::DatabaseError(msg)) => {
                msg.contains("database is locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_error(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::parse_error(format!("Failed to parse config: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}
