//! Liveness probes.
//!
//! A probe never returns an error: any failure (timeout, refused connection,
//! spawn error) is a failed [`ProbeResult`] carrying the reason.

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{process::Command, time::Instant};

use crate::config::{ProbeConfig, ProbeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub passed: bool,
    /// HTTP status or process exit code, when one was obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn pass(name: impl Into<String>, code: Option<i32>, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            passed: true,
            code,
            latency_ms,
            detail: None,
        }
    }

    pub fn fail(name: impl Into<String>, code: Option<i32>, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            code,
            latency_ms,
            detail: Some(detail.into()),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> ProbeResult;
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// GET a URL; any 2xx passes.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    name: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProbeResult {
        let started = Instant::now();
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                let code = Some(i32::from(status.as_u16()));
                if status.is_success() {
                    ProbeResult::pass(&self.name, code, elapsed_ms(started))
                } else {
                    ProbeResult::fail(&self.name, code, elapsed_ms(started), format!("HTTP {status}"))
                }
            }
            Err(e) => ProbeResult::fail(&self.name, None, elapsed_ms(started), e.to_string()),
        }
    }
}

/// Run a shell command; exit status 0 passes.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: String,
    command: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProbeResult {
        let started = Instant::now();
        let run = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Err(_) => ProbeResult::fail(
                &self.name,
                None,
                elapsed_ms(started),
                format!("timed out after {}ms", self.timeout.as_millis()),
            ),
            Ok(Err(e)) => ProbeResult::fail(&self.name, None, elapsed_ms(started), format!("failed to run: {e}")),
            Ok(Ok(output)) if output.status.success() => {
                ProbeResult::pass(&self.name, output.status.code(), elapsed_ms(started))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let detail = if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                };
                ProbeResult::fail(&self.name, output.status.code(), elapsed_ms(started), detail)
            }
        }
    }
}

/// Instantiate the probes listed in `[health].probes`.
pub fn build_probes(configs: &[ProbeConfig]) -> Vec<Arc<dyn HealthProbe>> {
    configs
        .iter()
        .map(|config| {
            let timeout = Duration::from_millis(config.timeout_ms);
            let probe: Arc<dyn HealthProbe> = match config.kind {
                ProbeKind::Http => Arc::new(HttpProbe::new(&config.name, &config.target, timeout)),
                ProbeKind::Command => {
                    Arc::new(CommandProbe::new(&config.name, &config.target, timeout))
                }
            };
            probe
        })
        .collect()
}
