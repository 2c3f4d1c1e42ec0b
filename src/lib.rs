// src/lib.rs
// Public library surface for the binary, integration tests and demos.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod connectivity;
pub mod coordinate;
pub mod error;
pub mod features;
pub mod fetch;
pub mod flight;
pub mod indices;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod retry;

use anyhow::Context;
use axum::Router;
use tokio_util::sync::CancellationToken;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::coordinate::Coordinate;
pub use crate::orchestrator::{Orchestrator, RecommendationResult, RequestFailure};

/// Everything the binary serves. Takes the installed [`metrics::Metrics`] so the
/// start-up connectivity gate is already recorded.
pub async fn service(
    cfg: &config::AppConfig,
    orchestrator: Orchestrator,
    metrics: &metrics::Metrics,
) -> anyhow::Result<Router> {
    if cfg.connectivity.probe_on_startup {
        let executor = retry::Executor::new(cfg.retry.policy());
        let report = connectivity::wait_until_reachable(
            orchestrator.probe(),
            orchestrator.targets(),
            &executor,
            &CancellationToken::new(),
        )
        .await
        .context("upstream data providers unreachable at start-up")?;
        tracing::info!(
            target: "advisor::startup",
            passed = report.targets.iter().filter(|t| t.passed()).count(),
            "start-up connectivity gate passed"
        );
    }

    Ok(router(AppState { orchestrator }).merge(metrics.router()))
}
