//! External health probes. Each check is an HTTP request with its own
//! timeout and expected status, run on its own interval. A failed probe is
//! logged and raised as an alert; it never mutates flag state. Consecutive
//! failure counts are exposed for rollback trigger conditions.

use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::types::{NotificationChannel, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Get,
    Head,
    Post,
}

impl ProbeMethod {
    fn as_http(&self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Post => reqwest::Method::POST,
        }
    }
}

/// One registered probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub method: ProbeMethod,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub expected_status: u16,
    pub interval_secs: u64,
    pub enabled: bool,
}

/// Result of a single probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub check: String,
    pub healthy: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthCheckRunner {
    client: reqwest::Client,
    checks: DashMap<String, HealthCheck>,
    consecutive_failures: DashMap<String, u32>,
    history: DashMap<String, Vec<ProbeOutcome>>,
    max_history: usize,
    notifier: Arc<Notifier>,
}

impl HealthCheckRunner {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            client: reqwest::Client::new(),
            checks: DashMap::new(),
            consecutive_failures: DashMap::new(),
            history: DashMap::new(),
            max_history: 100,
            notifier,
        }
    }

    pub fn register(&self, check: HealthCheck) {
        info!(check = %check.name, endpoint = %check.endpoint, "Health check registered");
        self.checks.insert(check.name.clone(), check);
    }

    pub fn list(&self) -> Vec<HealthCheck> {
        let mut checks: Vec<_> = self.checks.iter().map(|e| e.value().clone()).collect();
        checks.sort_by(|a, b| a.name.cmp(&b.name));
        checks
    }

    /// Run one probe. Timeouts, transport errors, and status mismatches all
    /// resolve to an unhealthy outcome; nothing propagates to the caller.
    pub async fn run_check(&self, name: &str) -> Option<ProbeOutcome> {
        let check = self.checks.get(name).map(|e| e.value().clone())?;
        let started = Instant::now();
        let result = self
            .client
            .request(check.method.as_http(), &check.endpoint)
            .timeout(Duration::from_millis(check.timeout_ms))
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == check.expected_status {
                    ProbeOutcome {
                        check: check.name.clone(),
                        healthy: true,
                        status: Some(status),
                        latency_ms,
                        message: format!("{status} in {latency_ms}ms"),
                        checked_at: Utc::now(),
                    }
                } else {
                    ProbeOutcome {
                        check: check.name.clone(),
                        healthy: false,
                        status: Some(status),
                        latency_ms,
                        message: format!("expected {} got {status}", check.expected_status),
                        checked_at: Utc::now(),
                    }
                }
            }
            Err(e) => ProbeOutcome {
                check: check.name.clone(),
                healthy: false,
                status: None,
                latency_ms,
                message: if e.is_timeout() {
                    format!("timed out after {}ms", check.timeout_ms)
                } else {
                    format!("probe error: {e}")
                },
                checked_at: Utc::now(),
            },
        };

        self.record_outcome(&check, &outcome).await;
        Some(outcome)
    }

    async fn record_outcome(&self, check: &HealthCheck, outcome: &ProbeOutcome) {
        if outcome.healthy {
            self.consecutive_failures.insert(check.name.clone(), 0);
        } else {
            let failures = {
                let mut entry = self
                    .consecutive_failures
                    .entry(check.name.clone())
                    .or_insert(0);
                *entry += 1;
                *entry
            };
            warn!(
                check = %check.name,
                endpoint = %check.endpoint,
                failures = failures,
                message = %outcome.message,
                "Health check failed"
            );
            let _ = self
                .notifier
                .send(
                    NotificationChannel::Webhook,
                    Severity::Warning,
                    format!("Health check failing: {}", check.name),
                    outcome.message.clone(),
                )
                .await;
        }

        let mut entry = self.history.entry(check.name.clone()).or_default();
        entry.push(outcome.clone());
        if entry.len() > self.max_history {
            let excess = entry.len() - self.max_history;
            entry.drain(..excess);
        }
    }

    /// Total consecutive failures across all checks; rollback trigger
    /// conditions compare against this.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.iter().map(|e| *e.value()).sum()
    }

    pub fn history(&self, name: &str) -> Vec<ProbeOutcome> {
        self.history.get(name).map(|v| v.clone()).unwrap_or_default()
    }

    /// Probe targets for the platform's own serving stack.
    pub fn seed_default_checks(&self, base_url: &str, timeout_ms: u64, interval_secs: u64) {
        self.register(HealthCheck {
            name: "api-liveness".into(),
            method: ProbeMethod::Get,
            endpoint: format!("{base_url}/live"),
            timeout_ms,
            expected_status: 200,
            interval_secs,
            enabled: true,
        });
        self.register(HealthCheck {
            name: "api-readiness".into(),
            method: ProbeMethod::Get,
            endpoint: format!("{base_url}/ready"),
            timeout_ms,
            expected_status: 200,
            interval_secs,
            enabled: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_http_server(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let _ = sock.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn check(endpoint: String, timeout_ms: u64, expected_status: u16) -> HealthCheck {
        HealthCheck {
            name: "probe".into(),
            method: ProbeMethod::Get,
            endpoint,
            timeout_ms,
            expected_status,
            interval_secs: 60,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_matching_status_is_healthy() {
        let base = spawn_http_server("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;
        let runner = HealthCheckRunner::new(Arc::new(Notifier::new()));
        runner.register(check(base, 2000, 200));

        let outcome = runner.run_check("probe").await.unwrap();
        assert!(outcome.healthy);
        assert_eq!(outcome.status, Some(200));
        assert_eq!(runner.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_status_mismatch_raises_alert() {
        let base = spawn_http_server(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let notifier = Arc::new(Notifier::new());
        let runner = HealthCheckRunner::new(notifier.clone());
        runner.register(check(base, 2000, 200));

        let outcome = runner.run_check("probe").await.unwrap();
        assert!(!outcome.healthy);
        assert_eq!(outcome.status, Some(503));
        assert_eq!(runner.failure_count(), 1);
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_connection_error_counts_as_failure() {
        // bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let runner = HealthCheckRunner::new(Arc::new(Notifier::new()));
        runner.register(check(format!("http://{addr}"), 500, 200));

        let outcome = runner.run_check("probe").await.unwrap();
        assert!(!outcome.healthy);
        assert_eq!(outcome.status, None);
        assert_eq!(runner.failure_count(), 1);

        // failures accumulate per consecutive run
        runner.run_check("probe").await.unwrap();
        assert_eq!(runner.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_recovery_resets_failures() {
        let base = spawn_http_server("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;
        let runner = HealthCheckRunner::new(Arc::new(Notifier::new()));
        runner.register(check(base, 2000, 500)); // force mismatch first

        runner.run_check("probe").await.unwrap();
        assert_eq!(runner.failure_count(), 1);

        // repoint expectations and recover
        let mut fixed = runner.list().remove(0);
        fixed.expected_status = 200;
        runner.register(fixed);
        runner.run_check("probe").await.unwrap();
        assert_eq!(runner.failure_count(), 0);
        assert_eq!(runner.history("probe").len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_check_is_none() {
        let runner = HealthCheckRunner::new(Arc::new(Notifier::new()));
        assert!(runner.run_check("nope").await.is_none());
    }
}
