//! # Environmental data fetchers
//! One fetcher per upstream source. Each `fetch` is a single attempt that
//! normalises the provider payload into a [`PartialFeatureVector`]; retries
//! belong to the executor.
//!
//! Every fetcher can run against a live endpoint or a canned payload
//! (`from_fixture`), which is what the offline tests and demos use.

pub mod climate;
pub mod soil;
pub mod vegetation;

use async_trait::async_trait;
use metrics::histogram;
use serde::de::DeserializeOwned;

use crate::config::SourceConfig;
use crate::coordinate::Coordinate;
use crate::error::FetchError;
use crate::features::{PartialFeatureVector, Source};

pub use climate::ClimateFetcher;
pub use soil::SoilFetcher;
pub use vegetation::VegetationFetcher;

#[async_trait]
pub trait EnvironmentalFetcher: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch(&self, coordinate: Coordinate) -> Result<PartialFeatureVector, FetchError>;
}

/// Where a fetcher gets its payload from.
#[derive(Clone)]
pub(crate) enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        settings: SourceConfig,
    },
}

impl Mode {
    pub(crate) fn http(settings: SourceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!("crop-advisor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Mode::Http { client, settings })
    }
}

/// GET `url` with `query` (plus the optional `apikey`) and decode JSON.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    settings: &SourceConfig,
    url: &str,
    query: &[(&str, String)],
    provider: &str,
) -> Result<T, FetchError> {
    let mut req = client.get(url).query(query);
    if let Some(key) = settings.api_key.as_deref() {
        req = req.query(&[("apikey", key)]);
    }
    let rsp = req.send().await?;
    let status = rsp.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status, provider));
    }
    Ok(rsp.json::<T>().await?)
}

/// Decode a canned payload the same way a live body would be decoded.
pub(crate) fn decode_fixture<T: DeserializeOwned>(s: &str, provider: &str) -> Result<T, FetchError> {
    serde_json::from_str(s)
        .map_err(|e| FetchError::transient(format!("{provider} fixture undecodable: {e}")))
}

/// Record normalisation time for one payload.
pub(crate) fn record_parse(source: Source, started: std::time::Instant) {
    histogram!("advisor_parse_ms", "source" => source.as_str())
        .record(started.elapsed().as_secs_f64() * 1_000.0);
}

/// Arithmetic mean of the finite values; `None` when there are none.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_skips_non_finite() {
        assert_eq!(mean([1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(mean(Vec::<f64>::new()), None);
    }
}
