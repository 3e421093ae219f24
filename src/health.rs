//! Health verification
//!
//! Polls an HTTP endpoint until it answers 2xx or a deadline passes. Polling
//! can be cancelled through a watch channel; a cancelled check returns the
//! state reached so far, marked non-terminal.

use crate::error::ProvisionError;
use crate::progress::{ProgressEvent, ProgressHandler};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::HOST;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Where to send health requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTarget {
    pub url: String,
    /// Sent as the `Host` header so a name-based proxy routes the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
}

impl HealthTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host_header: None,
        }
    }

    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        self.host_header = Some(host.into());
        self
    }

    /// Same origin and host header, different path
    pub fn with_path(&self, path: &str) -> Self {
        let origin = match self.url.find("://") {
            Some(scheme_end) => {
                let rest = &self.url[scheme_end + 3..];
                let end = rest.find('/').map(|i| scheme_end + 3 + i);
                end.map_or(self.url.as_str(), |e| &self.url[..e])
            }
            None => self.url.as_str(),
        };
        Self {
            url: format!("{}{}", origin, path),
            host_header: self.host_header.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
        }
    }
}

/// Result of a health verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    /// At least one probe was sent
    pub checked: bool,
    pub healthy: bool,
    /// Healthy, or the deadline elapsed; false when cancelled or never run
    pub terminal: bool,
    /// Probes that failed or timed out; the successful one is not counted
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
}

impl HealthState {
    pub fn cancelled(&self) -> bool {
        !self.terminal && !self.healthy
    }
}

/// One request against a health or smoke endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok` on a 2xx response, an error describing the failure otherwise
    async fn probe(&self, target: &HealthTarget) -> Result<()>;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        Self::with_request_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_request_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("hostrig/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, target: &HealthTarget) -> Result<()> {
        let mut request = self.client.get(&target.url);
        if let Some(host) = &target.host_header {
            request = request.header(HOST, host);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("GET {} failed", target.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", target.url, status);
        }
        Ok(())
    }
}

/// Resolves once the flag is set. A dropped sender means no cancellation
/// can arrive anymore, so this never resolves in that case.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct HealthVerifier {
    probe: Arc<dyn HealthProbe>,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl HealthVerifier {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            progress: None,
        }
    }

    pub fn with_progress(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    /// Poll `target` every `policy.interval` until healthy or `policy.timeout`
    /// has elapsed. The final probe lands on the deadline.
    pub async fn verify(
        &self,
        target: &HealthTarget,
        policy: HealthPolicy,
        mut cancel: watch::Receiver<bool>,
    ) -> HealthState {
        let start = Instant::now();
        let deadline = start + policy.timeout;
        let mut state = HealthState::default();

        info!(
            "Verifying health at {} (timeout {}s, interval {}s)",
            target.url,
            policy.timeout.as_secs_f64(),
            policy.interval.as_secs_f64()
        );

        if *cancel.borrow_and_update() {
            warn!("Health verification cancelled before the first probe");
            return state;
        }

        let mut probes = 0u32;
        loop {
            let probe_deadline = deadline.max(Instant::now() + policy.interval);
            let outcome = tokio::select! {
                r = tokio::time::timeout_at(probe_deadline, self.probe.probe(target)) => r,
                _ = cancelled(&mut cancel) => {
                    state.elapsed_ms = start.elapsed().as_millis() as u64;
                    warn!("Health verification cancelled after {} failed probe(s)", state.attempts);
                    return state;
                }
            };
            probes += 1;
            state.checked = true;

            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some("health probe timed out".to_string()),
            };

            if let Some(handler) = &self.progress {
                handler.on_progress(&ProgressEvent::HealthPoll {
                    attempt: probes,
                    healthy: error.is_none(),
                    error: error.clone(),
                });
            }

            match error {
                None => {
                    state.healthy = true;
                    state.terminal = true;
                    state.last_error = None;
                    break;
                }
                Some(e) => {
                    state.attempts += 1;
                    debug!(attempt = state.attempts, error = %e, "Health probe failed");
                    state.last_error = Some(e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                state.terminal = true;
                break;
            }

            let wait = policy.interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancelled(&mut cancel) => {
                    state.elapsed_ms = start.elapsed().as_millis() as u64;
                    warn!("Health verification cancelled after {} failed probe(s)", state.attempts);
                    return state;
                }
            }
        }

        state.elapsed_ms = start.elapsed().as_millis() as u64;
        if state.healthy {
            info!("Service healthy after {} failed probe(s)", state.attempts);
        } else {
            let timeout = ProvisionError::HealthCheckTimeout {
                timeout: policy.timeout,
                last_error: state.last_error.clone(),
            };
            warn!(attempts = state.attempts, "{}", timeout);
        }
        state
    }
}

/// Outcome of a one-shot request against an extra path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeCheck {
    pub path: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch every path once; failures are reported, never retried
pub async fn smoke_checks(
    probe: &dyn HealthProbe,
    base: &HealthTarget,
    paths: &[String],
) -> Vec<SmokeCheck> {
    let mut checks = Vec::with_capacity(paths.len());
    for path in paths {
        let target = base.with_path(path);
        let result = probe.probe(&target).await;
        if let Err(e) = &result {
            warn!("Smoke check {} failed: {:#}", path, e);
        }
        checks.push(SmokeCheck {
            path: path.clone(),
            ok: result.is_ok(),
            error: result.err().map(|e| format!("{:#}", e)),
        });
    }
    checks
}
