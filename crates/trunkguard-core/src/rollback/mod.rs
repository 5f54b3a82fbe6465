//! Deciding on and carrying out trunk rollbacks.
//!
//! Flow: [`ContextGatherer`] reads the facts, [`analyze`] turns a failure
//! signal into an immutable [`RollbackDecision`], the [`RollbackLedger`]
//! appends it, and the [`RollbackExecutor`] acts on it.

pub mod context;
pub mod decision;
pub mod executor;
pub mod feasibility;
pub mod ledger;

pub use context::{compile_patterns, ContextGatherer};
pub use decision::{
    analyze, classify, recommend, DecisionPolicy, FailureType, RollbackContext, RollbackDecision,
    RollbackRecommendation, Severity,
};
pub use executor::{HealthVerifier, RollbackExecutor, RollbackReport, VerifySettings};
pub use feasibility::{check_feasibility, Feasibility};
pub use ledger::{ExecutionStatus, RollbackExecution, RollbackLedger, StoredDecision};
