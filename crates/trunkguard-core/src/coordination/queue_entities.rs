//! Queue entities: integration requests, conflict reports and audit events.

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue_status::{IntegrationStatus, TransitionError};
use crate::{repository::CommitId, Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IDENTIFIERS AND TIMESTAMPS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Globally unique, time-ordered request identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::invalid_request(format!("Invalid request id '{s}': {e}")))
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::parse_error(format!("Invalid timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CONFLICT REPORT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What should happen with a conflicting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    #[default]
    None,
    AutoRebase,
    Manual,
}

impl Recommendation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AutoRebase => "auto_rebase",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files a simulated merge would conflict on, plus the routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    pub files: Vec<String>,
    pub recommendation: Recommendation,
}

impl ConflictReport {
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_files(files: Vec<String>) -> Self {
        Self {
            files,
            recommendation: Recommendation::None,
        }
    }

    #[must_use]
    pub const fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = recommendation;
        self
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.files.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QUEUE ENTRY
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulated timing and retry figures for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMetrics {
    /// Total time spent waiting in `QUEUED` before being picked up.
    pub wait_ms: u64,
    /// Time spent inside the merge critical section.
    pub merge_ms: u64,
    /// Successful automatic rebases so far.
    pub retry_count: u32,
}

/// One integration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: RequestId,
    pub source_branch: String,
    pub target_branch: String,
    pub requester_id: String,
    pub status: IntegrationStatus,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_report: Option<ConflictReport>,
    pub metrics: EntryMetrics,
    /// Error that produced the current state, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Trunk tip the merge was applied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trunk_before: Option<CommitId>,
    /// Trunk tip after the merge was published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trunk_after: Option<CommitId>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// A fresh request in `SUBMITTED`.
    #[must_use]
    pub fn new(
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        requester_id: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            requester_id: requester_id.into(),
            status: IntegrationStatus::Submitted,
            priority,
            submitted_at: now,
            queued_at: None,
            started_at: None,
            completed_at: None,
            conflict_report: None,
            metrics: EntryMetrics::default(),
            last_error: None,
            trunk_before: None,
            trunk_after: None,
            updated_at: now,
        }
    }

    /// Move to `to`, maintaining timestamps, wait metrics and the re-queue reset.
    pub fn transition(
        &mut self,
        to: IntegrationStatus,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TransitionError> {
        let from = self.status;
        from.validate_transition(to)?;

        if IntegrationStatus::is_requeue(from, to) {
            self.conflict_report = None;
        }

        match to {
            IntegrationStatus::Queued => {
                self.queued_at = Some(now);
            }
            IntegrationStatus::ConflictCheck => {
                if let Some(queued_at) = self.queued_at.take() {
                    self.metrics.wait_ms =
                        self.metrics.wait_ms.saturating_add(millis_between(queued_at, now));
                }
                self.started_at.get_or_insert(now);
            }
            _ => {}
        }

        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        if !matches!(to, IntegrationStatus::Failed) {
            self.last_error = None;
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Transition to `FAILED` with the originating error attached.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TransitionError> {
        self.transition(IntegrationStatus::Failed, now)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Re-queue after a transient failure, remembering why.
    pub fn requeue_after(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TransitionError> {
        self.transition(IntegrationStatus::Queued, now)?;
        self.last_error = Some(error.into());
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LIST FILTER, STATS, EVENTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convenience predicate for `QueueStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub statuses: Vec<IntegrationStatus>,
    pub target_branch: Option<String>,
    pub requester_id: Option<String>,
    /// Hide terminal entries.
    pub active_only: bool,
}

impl QueueFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status(mut self, status: IntegrationStatus) -> Self {
        self.statuses.push(status);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_branch = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester_id = Some(requester.into());
        self
    }

    #[must_use]
    pub const fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    #[must_use]
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&entry.status))
            && self
                .target_branch
                .as_ref()
                .map_or(true, |t| *t == entry.target_branch)
            && self
                .requester_id
                .as_ref()
                .map_or(true, |r| *r == entry.requester_id)
            && !(self.active_only && entry.status.is_terminal())
    }
}

/// Aggregate figures over the whole queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub manual_required: usize,
    pub merged: usize,
    pub failed: usize,
    pub canceled: usize,
    pub avg_wait_ms: u64,
    pub avg_merge_ms: u64,
}

/// One row of the append-only transition audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub seq: i64,
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<IntegrationStatus>,
    pub to_status: IntegrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DATABASE ROWS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `integration_queue` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct QueueRow {
    pub id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub requester_id: String,
    pub status: String,
    pub priority: i64,
    pub submitted_at: String,
    pub queued_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub conflict_report: Option<String>,
    pub metrics: String,
    pub last_error: Option<String>,
    pub trunk_before: Option<String>,
    pub trunk_after: Option<String>,
    pub updated_at: String,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = Error;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse()?,
            source_branch: row.source_branch,
            target_branch: row.target_branch,
            requester_id: row.requester_id,
            status: row.status.parse()?,
            priority: i32::try_from(row.priority)
                .map_err(|e| Error::parse_error(format!("Invalid priority: {e}")))?,
            submitted_at: parse_ts(&row.submitted_at)?,
            queued_at: parse_opt_ts(row.queued_at.as_deref())?,
            started_at: parse_opt_ts(row.started_at.as_deref())?,
            completed_at: parse_opt_ts(row.completed_at.as_deref())?,
            conflict_report: row
                .conflict_report
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            metrics: serde_json::from_str(&row.metrics)?,
            last_error: row.last_error,
            trunk_before: row.trunk_before.map(CommitId::new),
            trunk_after: row.trunk_after.map(CommitId::new),
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

/// `queue_events` row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub seq: i64,
    pub request_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub message: Option<String>,
    pub at: String,
}

impl TryFrom<EventRow> for QueueEvent {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            seq: row.seq,
            request_id: row.request_id.parse()?,
            from_status: row.from_status.map(|s| s.parse()).transpose()?,
            to_status: row.to_status.parse()?,
            message: row.message,
            at: parse_ts(&row.at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry::new("feature", "main", "term-1", 5, Utc::now())
    }

    #[test]
    fn test_new_entry_is_submitted() {
        let e = entry();
        assert_eq!(e.status, IntegrationStatus::Submitted);
        assert!(e.started_at.is_none());
        assert!(e.conflict_report.is_none());
    }

    #[test]
    fn test_wait_time_accumulates_on_pickup() -> Result<()> {
        let mut e = entry();
        let t0 = e.submitted_at;
        e.transition(IntegrationStatus::Queued, t0)?;
        e.transition(IntegrationStatus::ConflictCheck, t0 + Duration::milliseconds(1500))?;
        assert_eq!(e.metrics.wait_ms, 1500);
        assert_eq!(e.started_at, Some(t0 + Duration::milliseconds(1500)));
        Ok(())
    }

    #[test]
    fn test_requeue_resets_conflict_report() -> Result<()> {
        let mut e = entry();
        let now = Utc::now();
        e.transition(IntegrationStatus::Queued, now)?;
        e.transition(IntegrationStatus::ConflictCheck, now)?;
        e.conflict_report = Some(
            ConflictReport::with_files(vec!["a.rs".to_string()])
                .with_recommendation(Recommendation::AutoRebase),
        );
        e.transition(IntegrationStatus::ConflictDetected, now)?;
        e.transition(IntegrationStatus::RebasePending, now)?;
        e.transition(IntegrationStatus::Queued, now)?;
        assert!(e.conflict_report.is_none());
        Ok(())
    }

    #[test]
    fn test_fail_attaches_error_and_completes() -> Result<()> {
        let mut e = entry();
        let now = Utc::now();
        e.transition(IntegrationStatus::Queued, now)?;
        e.transition(IntegrationStatus::ConflictCheck, now)?;
        e.transition(IntegrationStatus::Merging, now)?;
        e.fail("push rejected", now)?;
        assert_eq!(e.status, IntegrationStatus::Failed);
        assert_eq!(e.last_error.as_deref(), Some("push rejected"));
        assert_eq!(e.completed_at, Some(now));
        Ok(())
    }

    #[test]
    fn test_illegal_transition_leaves_entry_unchanged() {
        let mut e = entry();
        let before = e.clone();
        assert!(e.transition(IntegrationStatus::Merged, Utc::now()).is_err());
        assert_eq!(e, before);
    }

    #[test]
    fn test_filter_matches() -> Result<()> {
        let mut e = entry();
        e.transition(IntegrationStatus::Queued, Utc::now())?;

        assert!(QueueFilter::new().matches(&e));
        assert!(QueueFilter::new().with_target("main").matches(&e));
        assert!(!QueueFilter::new().with_target("release").matches(&e));
        assert!(QueueFilter::new()
            .with_status(IntegrationStatus::Queued)
            .with_requester("term-1")
            .matches(&e));
        assert!(!QueueFilter::new().with_status(IntegrationStatus::Merged).matches(&e));
        Ok(())
    }

    #[test]
    fn test_request_id_parse_roundtrip() -> Result<()> {
        let id = RequestId::generate();
        assert_eq!(id.to_string().parse::<RequestId>()?, id);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
        Ok(())
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() -> Result<()> {
        let ts = Utc::now();
        let text = format_ts(ts);
        assert!(text.ends_with('Z'));
        assert_eq!(parse_ts(&text)?.timestamp_micros(), ts.timestamp_micros());
        Ok(())
    }
}
