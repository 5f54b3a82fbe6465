//! Outbound notices for humans.
//!
//! The core emits structured [`AlertEvent`]s and never waits for delivery:
//! [`AlertSink::emit`] is synchronous and must return promptly. Sinks that
//! talk to the network hand the event to a spawned task.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AlertsConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EVENT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    IntegrationMerged,
    IntegrationFailed,
    ManualRequired,
    HealthDegraded,
    RollbackRecommended,
    RollbackScheduled,
    RollbackCanceled,
    RollbackSucceeded,
    RollbackFailed,
    RollbackHeld,
}

/// One structured notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            request_id: None,
            target: None,
        }
    }

    #[must_use]
    pub fn with_request(mut self, request_id: impl ToString) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Identity used for duplicate suppression.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.kind,
            self.request_id.as_deref().unwrap_or("-"),
            self.target.as_deref().unwrap_or("-")
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SINKS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-way delivery of alert events.
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: &AlertEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn emit(&self, event: &AlertEvent) {
        let request_id = event.request_id.as_deref().unwrap_or("-");
        match event.severity {
            AlertSeverity::Info => {
                tracing::info!(kind = %event.kind, request_id, "{}", event.message);
            }
            AlertSeverity::Warning => {
                tracing::warn!(kind = %event.kind, request_id, "{}", event.message);
            }
            AlertSeverity::Error | AlertSeverity::Critical => {
                tracing::error!(
                    kind = %event.kind,
                    severity = ?event.severity,
                    request_id,
                    "{}",
                    event.message
                );
            }
        }
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AlertEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl AlertSink for JsonlFileSink {
    fn emit(&self, event: &AlertEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to append alert");
        }
    }
}

/// POSTs each event as JSON. Delivery runs on a spawned task.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl AlertSink for WebhookSink {
    fn emit(&self, event: &AlertEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(url = %self.url, "No async runtime; webhook alert dropped");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let event = event.clone();
        handle.spawn(async move {
            let sent = client
                .post(&url)
                .timeout(Duration::from_secs(10))
                .json(&event)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(e) = sent {
                tracing::warn!(url = %url, kind = %event.kind, error = %e, "Webhook alert delivery failed");
            }
        });
    }
}

/// Forwards to every inner sink.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn emit(&self, event: &AlertEvent) {
        self.sinks.iter().for_each(|sink| sink.emit(event));
    }
}

/// Drops repeats of the same [`AlertEvent::dedup_key`] inside the cooldown.
pub struct CooldownSink {
    inner: Arc<dyn AlertSink>,
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl CooldownSink {
    pub fn new(inner: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            inner,
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn should_send(&self, key: String, now: Instant) -> bool {
        let mut last_sent = self
            .last_sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let suppressed = last_sent
            .get(&key)
            .is_some_and(|sent| now.duration_since(*sent) < self.cooldown);
        if !suppressed {
            last_sent.insert(key, now);
        }
        !suppressed
    }
}

impl AlertSink for CooldownSink {
    fn emit(&self, event: &AlertEvent) {
        if self.should_send(event.dedup_key(), Instant::now()) {
            self.inner.emit(event);
        } else {
            tracing::debug!(kind = %event.kind, "Alert suppressed by cooldown");
        }
    }
}

/// Sink stack described by `[alerts]`: tracing, optional JSONL file and webhook, behind a cooldown.
pub fn build_sink(config: &AlertsConfig, base_dir: &Path) -> Arc<dyn AlertSink> {
    let mut fanout = FanoutSink::new().with(Arc::new(TracingSink));

    if let Some(log_file) = &config.log_file {
        let path = Path::new(log_file);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        fanout = fanout.with(Arc::new(JsonlFileSink::new(path)));
    }
    if let Some(url) = &config.webhook_url {
        fanout = fanout.with(Arc::new(WebhookSink::new(url.clone())));
    }

    Arc::new(CooldownSink::new(
        Arc::new(fanout),
        Duration::from_secs(config.cooldown_secs),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl AlertSink for Counter {
        fn emit(&self, _event: &AlertEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failed(id: &str) -> AlertEvent {
        AlertEvent::new(AlertKind::IntegrationFailed, AlertSeverity::Error, "push rejected")
            .with_request(id)
    }

    #[test]
    fn test_event_serializes_flat() -> serde_json::Result<()> {
        let json = serde_json::to_value(failed("r1"))?;
        assert_eq!(json["kind"], "integration_failed");
        assert_eq!(json["severity"], "ERROR");
        assert_eq!(json["request_id"], "r1");
        assert!(json.get("target").is_none());
        Ok(())
    }

    #[test]
    fn test_cooldown_suppresses_same_key_only() {
        let counter = Arc::new(Counter::default());
        let sink = CooldownSink::new(counter.clone(), Duration::from_secs(60));

        sink.emit(&failed("r1"));
        sink.emit(&failed("r1"));
        sink.emit(&failed("r2"));

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_cooldown_passes_everything() {
        let counter = Arc::new(Counter::default());
        let sink = CooldownSink::new(counter.clone(), Duration::ZERO);
        sink.emit(&failed("r1"));
        sink.emit(&failed("r1"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fanout_reaches_all() {
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let sink = FanoutSink::new().with(a.clone()).with(b.clone());
        sink.emit(&failed("r1"));
        assert_eq!(sink.len(), 2);
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = JsonlFileSink::new(dir.path().join("alerts/alerts.jsonl"));
        sink.emit(&failed("r1"));
        sink.emit(&failed("r2"));

        let content = std::fs::read_to_string(sink.path())?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AlertEvent = serde_json::from_str(lines[1])?;
        assert_eq!(parsed.request_id.as_deref(), Some("r2"));
        Ok(())
    }
}
