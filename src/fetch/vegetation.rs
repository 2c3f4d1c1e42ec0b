//! Vegetation source: ORNL DAAC MODIS web service, MOD13Q1 16-day NDVI at 250 m.
//!
//! The service returns at most ten composites per request, so the default
//! look-back is 144 days (nine 16-day periods).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;

use super::{decode_fixture, get_json, mean, record_parse, EnvironmentalFetcher, Mode};
use crate::config::SourceConfig;
use crate::coordinate::Coordinate;
use crate::error::FetchError;
use crate::features::{FeatureName, PartialFeatureVector, Source};

const PROVIDER: &str = "ornl-modis";
const PRODUCT: &str = "MOD13Q1";
const BAND: &str = "250m_16_days_NDVI";
const FILL_VALUE: f64 = -3000.0;
const VALID_RAW: std::ops::RangeInclusive<f64> = -2000.0..=10000.0;
const DEFAULT_SCALE: f64 = 0.0001;

#[derive(Debug, Deserialize)]
pub struct SubsetResponse {
    #[serde(default)]
    subset: Vec<Composite>,
    /// The service sends the scale as a string ("0.0001").
    #[serde(default)]
    scale: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Composite {
    modis_date: String,
    #[serde(default)]
    band: Option<String>,
    #[serde(default)]
    data: Vec<Option<f64>>,
}

impl SubsetResponse {
    fn scale(&self) -> f64 {
        let parsed: Option<f64> = match &self.scale {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        parsed
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_SCALE)
    }
}

pub struct VegetationFetcher {
    mode: Mode,
}

impl VegetationFetcher {
    pub fn new(settings: SourceConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            mode: Mode::http(settings)?,
        })
    }

    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }
}

/// MODIS composite date, e.g. `A2024001`.
pub fn modis_date(d: NaiveDate) -> String {
    format!("A{}", d.format("%Y%j"))
}

#[async_trait]
impl EnvironmentalFetcher for VegetationFetcher {
    fn source(&self) -> Source {
        Source::Vegetation
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<PartialFeatureVector, FetchError> {
        let payload: SubsetResponse = match &self.mode {
            Mode::Fixture(s) => decode_fixture(s, PROVIDER)?,
            Mode::Http { client, settings } => {
                let end = Utc::now().date_naive();
                let start = end - ChronoDuration::days(i64::from(settings.lookback_days));
                let url = format!("{}/{PRODUCT}/subset", settings.base_url.trim_end_matches('/'));
                let query = [
                    ("latitude", format!("{:.5}", coordinate.latitude())),
                    ("longitude", format!("{:.5}", coordinate.longitude())),
                    ("band", BAND.to_string()),
                    ("startDate", modis_date(start)),
                    ("endDate", modis_date(end)),
                    ("kmAboveBelow", "0".to_string()),
                    ("kmLeftRight", "0".to_string()),
                ];
                get_json(client, settings, &url, &query, PROVIDER).await?
            }
        };
        normalize(&payload)
    }
}

/// Leaf area index from NDVI (Baret-style inversion), clamped to [0, 8].
pub fn lai_from_ndvi(ndvi: f64) -> f64 {
    let ndvi = ndvi.clamp(-0.2, 0.68);
    let ratio = ((0.69 - ndvi) / 0.59).max(0.001);
    (-ratio.ln() / 0.91).clamp(0.0, 8.0)
}

/// Fraction of absorbed PAR for a given LAI.
pub fn fpar_from_lai(lai: f64) -> f64 {
    1.0 - (-0.5 * lai).exp()
}

/// Ordinary least-squares slope of `ys` against their index.
pub fn ols_slope(ys: &[f64]) -> Option<f64> {
    if ys.len() < 2 {
        return None;
    }
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n;
    let (num, den) = ys.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    (den > 0.0).then(|| num / den)
}

pub fn normalize(payload: &SubsetResponse) -> Result<PartialFeatureVector, FetchError> {
    let started = std::time::Instant::now();
    let scale = payload.scale();

    let mut composites: Vec<&Composite> = payload
        .subset
        .iter()
        .filter(|c| c.band.as_deref().map_or(true, |b| b == BAND))
        .collect();
    composites.sort_by(|a, b| a.modis_date.cmp(&b.modis_date));

    let series: Vec<f64> = composites
        .iter()
        .filter_map(|c| {
            mean(
                c.data
                    .iter()
                    .flatten()
                    .copied()
                    .filter(|raw| *raw != FILL_VALUE && VALID_RAW.contains(raw)),
            )
        })
        .map(|raw| raw * scale)
        .collect();

    if series.is_empty() {
        return Err(FetchError::validation("no valid NDVI samples for this location"));
    }

    let mut out = PartialFeatureVector::new(Source::Vegetation);
    let ndvi_mean = mean(series.iter().copied());
    out.insert_opt(FeatureName::NdviMean, ndvi_mean);
    out.insert_opt(FeatureName::NdviMax, series.iter().copied().reduce(f64::max));
    out.insert_opt(FeatureName::NdviTrend, ols_slope(&series));
    if let Some(m) = ndvi_mean {
        let lai = lai_from_ndvi(m);
        out.insert(FeatureName::Lai, lai);
        out.insert(FeatureName::Fpar, fpar_from_lai(lai));
    }

    tracing::debug!(
        target: "advisor::fetch",
        source = "vegetation",
        composites = series.len(),
        "vegetation payload normalised"
    );
    record_parse(Source::Vegetation, started);
    Ok(out)
}
