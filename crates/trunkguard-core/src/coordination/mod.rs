//! Serialized trunk integration: queue, precheck, rebase routing and merge.

pub mod locks;
pub mod merge_executor;
pub mod precheck;
pub mod queue;
pub mod queue_entities;
pub mod queue_status;
pub mod rebase_advisor;
pub mod scheduler;
pub mod submission;

pub use locks::{
    audit_trail, LockAuditEntry, LockInfo, MergeLock, MergeLockSettings, ProcessorLock, MAX_LEASE_SECS,
};
pub use merge_executor::{MergeExecutor, MergeOutcome};
pub use precheck::ConflictPrechecker;
pub use queue::QueueStore;
pub use queue_entities::{
    ConflictReport, EntryMetrics, QueueEntry, QueueEvent, QueueFilter, QueueStats, Recommendation,
    RequestId,
};
pub use queue_status::{IntegrationStatus, TransitionError};
pub use rebase_advisor::RebaseAdvisor;
pub use scheduler::{Processed, RunSummary, Scheduler, SchedulerSettings};
pub use submission::{cancel, requeue, submit, validate_branch_name, SubmitRequest};
