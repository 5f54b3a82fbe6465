//! # Trunkguard Core
//!
//! Serialized trunk integration with conflict prediction, and automatic
//! rollback of integrations that break deployment health.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` / `panic!()` outside tests
//! - No `unsafe`
//!
//! ## Layout
//!
//! - [`coordination`]: queue store, scheduler, precheck, rebase routing, merge executor
//! - [`rollback`]: decision engine, ledger, rollback executor
//! - [`health`]: probes, snapshots, monitor loop
//! - [`repository`]: the version-control boundary and its git implementation
//! - [`alerts`]: alert sinks
//!
//! All fallible operations return [`Result`]; errors carry a category
//! (validation, system, execution) that maps to a process exit code.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![allow(clippy::cast_precision_loss)]

pub mod alerts;
pub mod config;
pub mod coordination;
pub mod error;
pub mod filelock;
pub mod health;
pub mod output;
pub mod repository;
pub mod rollback;
pub mod shutdown;
pub mod timers;

pub use alerts::{AlertEvent, AlertKind, AlertSeverity, AlertSink};
pub use config::{load_config, Config};
pub use coordination::{IntegrationStatus, QueueEntry, QueueStore, RequestId, Scheduler};
pub use error::{Error, Result};
pub use output::{OutputFormat, SchemaEnvelope};
pub use repository::{CommitId, GitCli, RepositoryClient};
pub use rollback::{FailureType, RollbackDecision, RollbackRecommendation};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
