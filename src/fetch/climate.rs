//! Climate source: Open-Meteo historical archive (ERA5 reanalysis), daily series.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;

use super::{decode_fixture, get_json, mean, record_parse, EnvironmentalFetcher, Mode};
use crate::config::SourceConfig;
use crate::coordinate::Coordinate;
use crate::error::FetchError;
use crate::features::{FeatureName, PartialFeatureVector, Source};
use crate::indices;

const PROVIDER: &str = "open-meteo";
/// The archive lags real time by a few days.
const ARCHIVE_LAG_DAYS: i64 = 5;

pub const GDD_BASE: f64 = 10.0;
pub const GDD_UPPER: f64 = 30.0;

const DAILY_VARS: &str = "temperature_2m_mean,temperature_2m_max,temperature_2m_min,\
precipitation_sum,shortwave_radiation_sum,dew_point_2m_mean,relative_humidity_2m_mean";

#[derive(Debug, Deserialize)]
pub struct ArchiveResponse {
    #[serde(default)]
    daily: Option<Daily>,
}

#[derive(Debug, Default, Deserialize)]
struct Daily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation_sum: Vec<Option<f64>>,
    #[serde(default)]
    dew_point_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
}

pub struct ClimateFetcher {
    mode: Mode,
}

impl ClimateFetcher {
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

    fn window(lookback_days: u32) -> (NaiveDate, NaiveDate) {
        let end = Utc::now().date_naive() - ChronoDuration::days(ARCHIVE_LAG_DAYS);
        let start = end - ChronoDuration::days(i64::from(lookback_days));
        (start, end)
    }
}

#[async_trait]
impl EnvironmentalFetcher for ClimateFetcher {
    fn source(&self) -> Source {
        Source::Climate
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<PartialFeatureVector, FetchError> {
        let payload: ArchiveResponse = match &self.mode {
            Mode::Fixture(s) => decode_fixture(s, PROVIDER)?,
            Mode::Http { client, settings } => {
                let (start, end) = Self::window(settings.lookback_days);
                let query = [
                    ("latitude", format!("{:.4}", coordinate.latitude())),
                    ("longitude", format!("{:.4}", coordinate.longitude())),
                    ("start_date", start.format("%Y-%m-%d").to_string()),
                    ("end_date", end.format("%Y-%m-%d").to_string()),
                    ("daily", DAILY_VARS.to_string()),
                    ("timezone", "UTC".to_string()),
                ];
                get_json(client, settings, &settings.base_url, &query, PROVIDER).await?
            }
        };
        normalize(&payload)
    }
}

/// Saturation vapour pressure in hPa (Magnus formula).
pub fn saturation_vapor_pressure(t_celsius: f64) -> f64 {
    6.112 * ((17.67 * t_celsius) / (t_celsius + 243.5)).exp()
}

/// Daily growing degree days with base 10 °C and an upper cut-off of 30 °C.
pub fn daily_gdd(t_mean: f64) -> f64 {
    (t_mean - GDD_BASE).clamp(0.0, GDD_UPPER - GDD_BASE)
}

/// Derive the climate features from the daily series.
pub fn normalize(payload: &ArchiveResponse) -> Result<PartialFeatureVector, FetchError> {
    let started = std::time::Instant::now();
    let empty = Daily::default();
    let d = payload.daily.as_ref().unwrap_or(&empty);

    let finite = |v: &[Option<f64>]| -> Vec<f64> {
        v.iter().flatten().copied().filter(|x| x.is_finite()).collect()
    };

    let t_mean = finite(&d.temperature_2m_mean);
    if t_mean.is_empty() {
        return Err(FetchError::validation(
            "no temperature data for this location",
        ));
    }

    let mut out = PartialFeatureVector::new(Source::Climate);
    out.insert_opt(FeatureName::TemperatureAvg, mean(t_mean.iter().copied()));
    out.insert_opt(
        FeatureName::TemperatureMax,
        finite(&d.temperature_2m_max).into_iter().reduce(f64::max),
    );
    out.insert_opt(
        FeatureName::TemperatureMin,
        finite(&d.temperature_2m_min).into_iter().reduce(f64::min),
    );

    let precip = finite(&d.precipitation_sum);
    if !precip.is_empty() {
        out.insert(FeatureName::PrecipitationSum, precip.iter().sum());
    }
    let radiation = finite(&d.shortwave_radiation_sum);
    if !radiation.is_empty() {
        out.insert(FeatureName::RadiationSum, radiation.iter().sum());
    }
    out.insert_opt(
        FeatureName::HumidityAvg,
        mean(finite(&d.relative_humidity_2m_mean)),
    );

    let deficits = d
        .temperature_2m_mean
        .iter()
        .zip(d.dew_point_2m_mean.iter())
        .filter_map(|(t, td)| match (t, td) {
            (Some(t), Some(td)) => {
                Some((saturation_vapor_pressure(*t) - saturation_vapor_pressure(*td)).max(0.0))
            }
            _ => None,
        });
    out.insert_opt(FeatureName::VaporDeficit, mean(deficits));

    out.insert(FeatureName::Gdd, t_mean.iter().map(|t| daily_gdd(*t)).sum());

    if !precip.is_empty() {
        let total: f64 = precip.iter().sum();
        out.insert_opt(FeatureName::Gtk, indices::gtk(&t_mean, total));
        out.insert_opt(FeatureName::Spi, indices::spi(&precip));
    }

    tracing::debug!(
        target: "advisor::fetch",
        source = "climate",
        days = d.time.len(),
        features = out.len(),
        "climate payload normalised"
    );
    record_parse(Source::Climate, started);
    Ok(out)
}
