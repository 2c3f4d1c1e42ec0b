//! # Connectivity prober
//! Pre-flight check of the upstream hosts: DNS, TCP on 443, then an HTTPS `HEAD`.
//!
//! A failed step skips the later ones for that target. A single unreachable
//! target never errors; the report's `ok` flag is true when at least one
//! target passed all three checks.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{FetchError, RetryError};
use crate::retry::{AttemptContext, Executor};

const DEFAULT_PORT: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub host: String,
    pub resolved: bool,
    pub reachable: bool,
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TargetStatus {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            resolved: false,
            reachable: false,
            secure: false,
            note: None,
        }
    }

    fn failed(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.resolved && self.reachable && self.secure
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityReport {
    pub ok: bool,
    pub targets: Vec<TargetStatus>,
    pub checked_at: DateTime<Utc>,
}

impl ConnectivityReport {
    pub fn from_targets(targets: Vec<TargetStatus>) -> Self {
        Self {
            ok: targets.iter().any(TargetStatus::passed),
            targets,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self, targets: &[String]) -> ConnectivityReport;
}

/// Run `probe` and emit the report log record and counters.
pub async fn check_connectivity(
    probe: &dyn ConnectivityProbe,
    targets: &[String],
) -> ConnectivityReport {
    let report = probe.check(targets).await;

    let passed = report.targets.iter().filter(|t| t.passed()).count();
    counter!(
        "advisor_connectivity_checks_total",
        "ok" => if report.ok { "true" } else { "false" }
    )
    .increment(1);

    if report.ok {
        info!(
            target: "advisor::connectivity",
            targets = report.targets.len(),
            passed,
            "connectivity ok"
        );
    } else {
        let failures: Vec<String> = report
            .targets
            .iter()
            .map(|t| format!("{}: {}", t.host, t.note.as_deref().unwrap_or("failed")))
            .collect();
        warn!(
            target: "advisor::connectivity",
            targets = report.targets.len(),
            failures = ?failures,
            "no upstream host reachable"
        );
    }
    report
}

/// Start-up gate: re-probe under `executor`'s backoff until a check passes.
pub async fn wait_until_reachable(
    probe: &dyn ConnectivityProbe,
    targets: &[String],
    executor: &Executor,
    cancel: &CancellationToken,
) -> Result<ConnectivityReport, RetryError> {
    executor
        .execute(AttemptContext::new("connectivity"), cancel, || async {
            let report = check_connectivity(probe, targets).await;
            if report.ok {
                Ok(report)
            } else {
                Err(FetchError::transient("no upstream host reachable"))
            }
        })
        .await
}

/// Real network probe.
#[derive(Clone)]
pub struct NetworkProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetworkProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn probe(&self, target: &str) -> TargetStatus {
        let (host, port) = split_host_port(target);
        let mut status = TargetStatus::new(target);

        let addrs: Vec<SocketAddr> = match timeout(self.timeout, lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => return status.failed(format!("dns: {e}")),
            Err(_) => return status.failed("dns: timed out"),
        };
        if addrs.is_empty() {
            return status.failed("dns: no addresses");
        }
        status.resolved = true;

        let mut last_note = String::from("tcp: no address connected");
        for addr in &addrs {
            match timeout(self.timeout, TcpStream::connect(*addr)).await {
                Ok(Ok(_)) => {
                    status.reachable = true;
                    break;
                }
                Ok(Err(e)) => last_note = format!("tcp: {e}"),
                Err(_) => last_note = String::from("tcp: timed out"),
            }
        }
        if !status.reachable {
            return status.failed(last_note);
        }

        let url = if port == DEFAULT_PORT {
            format!("https://{host}/")
        } else {
            format!("https://{host}:{port}/")
        };
        // Any HTTP status means the TLS handshake completed.
        match self.client.head(&url).send().await {
            Ok(_) => status.secure = true,
            Err(e) => return status.failed(format!("https: {}", e.without_url())),
        }
        status
    }
}

#[async_trait]
impl ConnectivityProbe for NetworkProber {
    async fn check(&self, targets: &[String]) -> ConnectivityReport {
        let statuses = join_all(targets.iter().map(|t| self.probe(t))).await;
        ConnectivityReport::from_targets(statuses)
    }
}

/// `"host"` or `"host:port"`; anything unparsable falls back to port 443.
fn split_host_port(target: &str) -> (&str, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(p) => (host, p),
            Err(_) => (target, DEFAULT_PORT),
        },
        _ => (target, DEFAULT_PORT),
    }
}
