//! Soil source: ISRIC SoilGrids v2 `properties/query`.
//!
//! Values arrive as integers in "mapped units"; dividing by the layer's
//! `d_factor` gives conventional units. Layers are thickness-weighted over the
//! 0-100 cm root zone.

use async_trait::async_trait;
use serde::Deserialize;

use super::{decode_fixture, get_json, record_parse, EnvironmentalFetcher, Mode};
use crate::config::SourceConfig;
use crate::coordinate::Coordinate;
use crate::error::FetchError;
use crate::features::{FeatureName, PartialFeatureVector, Source, TextureClass};

const PROVIDER: &str = "soilgrids";
const ROOT_ZONE_CM: f64 = 100.0;
const DEPTHS: [&str; 5] = ["0-5cm", "5-15cm", "15-30cm", "30-60cm", "60-100cm"];

/// SoilGrids property name, target feature, fallback `d_factor`.
const PROPERTIES: [(&str, FeatureName, f64); 7] = [
    ("clay", FeatureName::ClayPct, 10.0),
    ("sand", FeatureName::SandPct, 10.0),
    ("silt", FeatureName::SiltPct, 10.0),
    ("soc", FeatureName::OrganicCarbon, 10.0),
    ("nitrogen", FeatureName::Nitrogen, 100.0),
    ("phh2o", FeatureName::Ph, 10.0),
    ("bdod", FeatureName::BulkDensity, 100.0),
];

#[derive(Debug, Deserialize)]
pub struct PropertiesResponse {
    #[serde(default)]
    properties: Option<Properties>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct Layer {
    name: String,
    #[serde(default)]
    unit_measure: Option<UnitMeasure>,
    #[serde(default)]
    depths: Vec<Depth>,
}

#[derive(Debug, Deserialize)]
struct UnitMeasure {
    #[serde(default)]
    d_factor: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Depth {
    #[serde(default)]
    range: Option<DepthRange>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    values: DepthValues,
}

#[derive(Debug, Deserialize)]
struct DepthRange {
    top_depth: f64,
    bottom_depth: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DepthValues {
    #[serde(default)]
    mean: Option<f64>,
}

impl Depth {
    /// `(top, bottom)` in cm, from `range` or a label like `"15-30cm"`.
    fn bounds(&self) -> Option<(f64, f64)> {
        if let Some(r) = &self.range {
            return Some((r.top_depth, r.bottom_depth));
        }
        let label = self.label.as_deref()?.trim_end_matches("cm");
        let (top, bottom) = label.split_once('-')?;
        Some((top.parse().ok()?, bottom.parse().ok()?))
    }
}

pub struct SoilFetcher {
    mode: Mode,
}

impl SoilFetcher {
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

#[async_trait]
impl EnvironmentalFetcher for SoilFetcher {
    fn source(&self) -> Source {
        Source::Soil
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<PartialFeatureVector, FetchError> {
        let payload: PropertiesResponse = match &self.mode {
            Mode::Fixture(s) => decode_fixture(s, PROVIDER)?,
            Mode::Http { client, settings } => {
                let mut query: Vec<(&str, String)> = vec![
                    ("lon", format!("{:.4}", coordinate.longitude())),
                    ("lat", format!("{:.4}", coordinate.latitude())),
                ];
                query.extend(PROPERTIES.iter().map(|(p, _, _)| ("property", p.to_string())));
                query.extend(DEPTHS.iter().map(|d| ("depth", d.to_string())));
                query.push(("value", "mean".to_string()));
                get_json(client, settings, &settings.base_url, &query, PROVIDER).await?
            }
        };
        normalize(&payload)
    }
}

/// Thickness-weighted mean over the root zone; `None` without usable layers.
fn root_zone_mean(layer: &Layer, d_factor: f64) -> Option<f64> {
    let (sum, weight) = layer
        .depths
        .iter()
        .filter_map(|d| {
            let (top, bottom) = d.bounds()?;
            let value = d.values.mean.filter(|v| v.is_finite())?;
            let w = (bottom.min(ROOT_ZONE_CM) - top).max(0.0);
            (w > 0.0).then_some((value / d_factor, w))
        })
        .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v * w, tw + w));
    (weight > 0.0).then(|| sum / weight)
}

pub fn normalize(payload: &PropertiesResponse) -> Result<PartialFeatureVector, FetchError> {
    let started = std::time::Instant::now();
    let empty = Properties::default();
    let props = payload.properties.as_ref().unwrap_or(&empty);

    let mut out = PartialFeatureVector::new(Source::Soil);
    for (name, feature, fallback) in PROPERTIES {
        let Some(layer) = props.layers.iter().find(|l| l.name == name) else {
            continue;
        };
        let d_factor = layer
            .unit_measure
            .as_ref()
            .and_then(|u| u.d_factor)
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(fallback);
        out.insert_opt(feature, root_zone_mean(layer, d_factor));
    }

    if out.is_empty() {
        return Err(FetchError::validation("no soil data for this location"));
    }

    if let (Some(clay), Some(sand), Some(silt)) = (
        out.get(FeatureName::ClayPct),
        out.get(FeatureName::SandPct),
        out.get(FeatureName::SiltPct),
    ) {
        let class = TextureClass::classify(clay, sand, silt);
        out.insert(FeatureName::TextureClass, class.code());
    }

    tracing::debug!(
        target: "advisor::fetch",
        source = "soil",
        features = out.len(),
        "soil payload normalised"
    );
    record_parse(Source::Soil, started);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_bounds_parse() {
        let d = Depth {
            range: None,
            label: Some("15-30cm".into()),
            values: DepthValues::default(),
        };
        assert_eq!(d.bounds(), Some((15.0, 30.0)));
    }

    #[test]
    fn deep_layer_is_ignored_and_d_factor_applied() {
        let p: PropertiesResponse = serde_json::from_str(
            r#"{"properties":{"layers":[{
                "name":"phh2o",
                "unit_measure":{"d_factor":10},
                "depths":[
                    {"label":"0-5cm","values":{"mean":60}},
                    {"label":"5-15cm","values":{"mean":70}},
                    {"label":"100-200cm","values":{"mean":90}}
                ]}]}}"#,
        )
        .unwrap();
        let v = normalize(&p).unwrap();
        // (6.0*5 + 7.0*10) / 15
        let ph = v.get(FeatureName::Ph).unwrap();
        assert!((ph - 100.0 / 15.0).abs() < 1e-9);
        assert_eq!(v.get(FeatureName::TextureClass), None);
    }

    #[test]
    fn all_null_means_is_validation_error() {
        let p: PropertiesResponse = serde_json::from_str(
            r#"{"properties":{"layers":[{"name":"clay","depths":[{"label":"0-5cm","values":{"mean":null}}]}]}}"#,
        )
        .unwrap();
        assert_eq!(
            normalize(&p).unwrap_err().class,
            crate::error::FailureClass::Validation
        );
    }
}
