//! Integration Status State Machine (Pure Domain Logic)
//!
//! This module contains the lifecycle of an integration request with:
//! - `IntegrationStatus` enum for queue entry states
//! - Pure transition validation (no DB, no async, no side effects)
//!
//! # State Machine
//!
//! ```text
//! submitted -> queued -> conflict_check -> merging -> merged
//!                ^  |         |    |          |
//!                |  v         |    |          +-> failed
//!                | canceled   |    +-> failed
//!                |            v
//!                |     conflict_detected -> rebase_pending -> queued | failed
//!                |            |
//!                |            v
//!                +---- manual_required -> canceled
//!
//! conflict_check -> queued   (re-queue: lock timeout, crash recovery)
//! merging        -> queued   (re-queue: transient push failure)
//! ```
//!
//! Terminal states: `merged`, `failed`, `canceled`

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE MACHINE ERROR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error type for invalid lifecycle transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid state transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: IntegrationStatus,
    pub to: IntegrationStatus,
}

impl From<TransitionError> for Error {
    fn from(err: TransitionError) -> Self {
        Self::invalid_transition(err.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// INTEGRATION STATUS STATE MACHINE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of an integration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationStatus {
    /// Accepted for validation, not yet ordered.
    Submitted,
    /// Waiting for the scheduler.
    Queued,
    /// Merge simulation in progress.
    ConflictCheck,
    /// Trunk mutation in progress under the merge lock.
    Merging,
    /// Precheck reported conflicting files.
    ConflictDetected,
    /// Automatic rebase approved and in progress.
    RebasePending,
    /// A human has to resolve the conflict.
    ManualRequired,
    Merged,
    Failed,
    Canceled,
}

impl IntegrationStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Queued => "QUEUED",
            Self::ConflictCheck => "CONFLICT_CHECK",
            Self::Merging => "MERGING",
            Self::ConflictDetected => "CONFLICT_DETECTED",
            Self::RebasePending => "REBASE_PENDING",
            Self::ManualRequired => "MANUAL_REQUIRED",
            Self::Merged => "MERGED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Returns true if this status is terminal (no valid outgoing transitions).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Failed | Self::Canceled)
    }

    /// States a requester may still cancel from.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self, Self::Queued | Self::ManualRequired)
    }

    /// States the scheduler owns while it works on an entry.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::ConflictCheck | Self::Merging | Self::ConflictDetected | Self::RebasePending
        )
    }

    /// Returns true if a transition from `self` to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.validate_transition(target).is_ok()
    }

    /// Validates that a transition from `self` to `target` is allowed.
    ///
    /// Unlike a plain state update, staying in the same state is not a
    /// transition and is rejected; every accepted move changes the state.
    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        let is_valid = match self {
            Self::Submitted => matches!(target, Self::Queued),
            Self::Queued => matches!(target, Self::ConflictCheck | Self::Canceled),
            Self::ConflictCheck => matches!(
                target,
                Self::Merging | Self::ConflictDetected | Self::Queued | Self::Failed | Self::Merged
            ),
            Self::ConflictDetected => matches!(target, Self::RebasePending | Self::ManualRequired),
            Self::RebasePending => matches!(target, Self::Queued | Self::Failed),
            Self::Merging => matches!(target, Self::Merged | Self::Failed | Self::Queued),
            Self::ManualRequired => matches!(target, Self::Queued | Self::Canceled),
            Self::Merged | Self::Failed | Self::Canceled => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Transitions that put an entry back in line and reset its conflict report.
    #[must_use]
    pub const fn is_requeue(from: Self, to: Self) -> bool {
        matches!(to, Self::Queued) && !matches!(from, Self::Submitted)
    }

    /// Returns all possible statuses as a slice.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Submitted,
            Self::Queued,
            Self::ConflictCheck,
            Self::Merging,
            Self::ConflictDetected,
            Self::RebasePending,
            Self::ManualRequired,
            Self::Merged,
            Self::Failed,
            Self::Canceled,
        ]
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::parse_error(format!("Invalid integration status: {s}")))
    }
}

impl TryFrom<String> for IntegrationStatus {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}
