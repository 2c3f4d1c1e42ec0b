//! Crop Advisor Service - Binary Entrypoint
//! Loads config, gates start-up on upstream connectivity, then serves the
//! recommendation API plus `/metrics`.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crop_advisor::config::AppConfig;
use crop_advisor::metrics::Metrics;
use crop_advisor::Orchestrator;

/// Compact logs by default; `ADVISOR_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("advisor=info,crop_advisor=info,warn"));

    let json = std::env::var("ADVISOR_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may have installed a subscriber already; keep theirs if so.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = AppConfig::load_default().context("loading advisor config")?;
    let orchestrator = Orchestrator::from_config(&cfg)?;

    // Recorder before the start-up gate.
    let metrics = Metrics::init(cfg.cache.ttl()?)?;
    let router = crop_advisor::service(&cfg, orchestrator, &metrics).await?;

    Ok(router.into())
}
