//! One-shot connectivity check against the configured upstream hosts; prints the report as JSON.
//! Exit code 0 when at least one host passed, 1 otherwise.

use anyhow::Context;
use crop_advisor::config::AppConfig;
use crop_advisor::connectivity::{check_connectivity, NetworkProber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = AppConfig::load_default().context("loading advisor config")?;
    let prober = NetworkProber::new(cfg.connectivity.timeout()).context("building prober")?;

    let report = check_connectivity(&prober, &cfg.connectivity.targets).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
