//! Execution error types for persisted state, locks and lifecycle rules.

use std::fmt;

/// Execution errors represent problems with the queue, locks or rollback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Database operation failed
    DatabaseError(String),
    /// Resource not found
    NotFound(String),
    /// A lifecycle transition that the state machine forbids
    InvalidTransition(String),
    /// Timed out waiting for an exclusive lock
    LockTimeout { resource: String, waited_ms: u64 },
    /// Lock is held by someone else
    LockHeld { resource: String, holder: String },
    /// Caller is not the requester that owns the entry
    NotRequester { id: String, requester: String },
    /// Rollback was vetoed by the feasibility check
    RollbackInfeasible { reasons: Vec<String> },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "{msg}"),
            Self::LockTimeout {
                resource,
                waited_ms,
            } => write!(
                f,
                "LOCK_TIMEOUT: gave up waiting for lock '{resource}' after {waited_ms}ms"
            ),
            Self::LockHeld { resource, holder } => {
                write!(f, "Lock '{resource}' is held by '{holder}'")
            }
            Self::NotRequester { id, requester } => write!(
                f,
                "Request {id} belongs to '{requester}' and can only be changed by its requester"
            ),
            Self::RollbackInfeasible { reasons } => {
                write!(f, "Rollback is not feasible: {}", reasons.join("; "))
            }
        }
    }
}

impl ExecutionError {
    /// Get exit code for execution errors.
    /// - Not found: 3
    /// - Everything else is an invalid state: 4
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 3,
            _ => 4,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::LockHeld { .. } => "LOCK_HELD",
            Self::NotRequester { .. } => "NOT_REQUESTER",
            Self::RollbackInfeasible { .. } => "ROLLBACK_INFEASIBLE",
        }
    }
}
