//! # Feature schema
//! The fixed set of environmental features a location is described by.
//!
//! Feature names are an enum, so nothing at runtime can invent a new one.
//! Every value is either `Present(f64)` or `Missing`; the scoring engine
//! matches on both explicitly instead of probing for keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Version of the feature schema below. The model artifact must match it.
pub const FEATURE_SCHEMA_VERSION: u32 = 2;

/// Upstream data sources, in merge priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Climate,
    Vegetation,
    Soil,
}

impl Source {
    /// Merge priority: earlier sources win per feature.
    pub const ALL: [Source; 3] = [Source::Climate, Source::Vegetation, Source::Soil];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Climate => "climate",
            Source::Vegetation => "vegetation",
            Source::Soil => "soil",
        }
    }

    /// Climate is the only source whose failure aborts a request.
    pub fn is_mandatory(self) -> bool {
        matches!(self, Source::Climate)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    TemperatureAvg,
    TemperatureMax,
    TemperatureMin,
    PrecipitationSum,
    RadiationSum,
    HumidityAvg,
    VaporDeficit,
    Gdd,
    Gtk,
    Spi,
    NdviMean,
    NdviMax,
    NdviTrend,
    Lai,
    Fpar,
    ClayPct,
    SandPct,
    SiltPct,
    OrganicCarbon,
    Nitrogen,
    Ph,
    BulkDensity,
    TextureClass,
}

impl FeatureName {
    pub const ALL: [FeatureName; 23] = [
        FeatureName::TemperatureAvg,
        FeatureName::TemperatureMax,
        FeatureName::TemperatureMin,
        FeatureName::PrecipitationSum,
        FeatureName::RadiationSum,
        FeatureName::HumidityAvg,
        FeatureName::VaporDeficit,
        FeatureName::Gdd,
        FeatureName::Gtk,
        FeatureName::Spi,
        FeatureName::NdviMean,
        FeatureName::NdviMax,
        FeatureName::NdviTrend,
        FeatureName::Lai,
        FeatureName::Fpar,
        FeatureName::ClayPct,
        FeatureName::SandPct,
        FeatureName::SiltPct,
        FeatureName::OrganicCarbon,
        FeatureName::Nitrogen,
        FeatureName::Ph,
        FeatureName::BulkDensity,
        FeatureName::TextureClass,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureName::TemperatureAvg => "temperature_avg",
            FeatureName::TemperatureMax => "temperature_max",
            FeatureName::TemperatureMin => "temperature_min",
            FeatureName::PrecipitationSum => "precipitation_sum",
            FeatureName::RadiationSum => "radiation_sum",
            FeatureName::HumidityAvg => "humidity_avg",
            FeatureName::VaporDeficit => "vapor_deficit",
            FeatureName::Gdd => "gdd",
            FeatureName::Gtk => "gtk",
            FeatureName::Spi => "spi",
            FeatureName::NdviMean => "ndvi_mean",
            FeatureName::NdviMax => "ndvi_max",
            FeatureName::NdviTrend => "ndvi_trend",
            FeatureName::Lai => "lai",
            FeatureName::Fpar => "fpar",
            FeatureName::ClayPct => "clay_pct",
            FeatureName::SandPct => "sand_pct",
            FeatureName::SiltPct => "silt_pct",
            FeatureName::OrganicCarbon => "organic_carbon",
            FeatureName::Nitrogen => "nitrogen",
            FeatureName::Ph => "ph",
            FeatureName::BulkDensity => "bulk_density",
            FeatureName::TextureClass => "texture_class",
        }
    }

    /// The source expected to provide this feature.
    pub fn source(self) -> Source {
        use FeatureName::*;
        match self {
            TemperatureAvg | TemperatureMax | TemperatureMin | PrecipitationSum | RadiationSum
            | HumidityAvg | VaporDeficit | Gdd | Gtk | Spi => Source::Climate,
            NdviMean | NdviMax | NdviTrend | Lai | Fpar => Source::Vegetation,
            ClayPct | SandPct | SiltPct | OrganicCarbon | Nitrogen | Ph | BulkDensity
            | TextureClass => Source::Soil,
        }
    }

    /// Human-readable label used in rationale statements.
    pub fn label(self) -> &'static str {
        match self {
            FeatureName::TemperatureAvg => "Mean air temperature",
            FeatureName::TemperatureMax => "Maximum air temperature",
            FeatureName::TemperatureMin => "Minimum air temperature",
            FeatureName::PrecipitationSum => "Annual precipitation",
            FeatureName::RadiationSum => "Solar radiation",
            FeatureName::HumidityAvg => "Mean relative humidity",
            FeatureName::VaporDeficit => "Vapour pressure deficit",
            FeatureName::Gdd => "Growing degree days",
            FeatureName::Gtk => "Hydrothermal coefficient",
            FeatureName::Spi => "Standardised precipitation index",
            FeatureName::NdviMean => "Mean NDVI",
            FeatureName::NdviMax => "Peak NDVI",
            FeatureName::NdviTrend => "NDVI trend",
            FeatureName::Lai => "Leaf area index",
            FeatureName::Fpar => "Absorbed PAR fraction",
            FeatureName::ClayPct => "Clay content",
            FeatureName::SandPct => "Sand content",
            FeatureName::SiltPct => "Silt content",
            FeatureName::OrganicCarbon => "Soil organic carbon",
            FeatureName::Nitrogen => "Soil nitrogen",
            FeatureName::Ph => "Soil pH",
            FeatureName::BulkDensity => "Bulk density",
            FeatureName::TextureClass => "Soil texture",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            FeatureName::TemperatureAvg
            | FeatureName::TemperatureMax
            | FeatureName::TemperatureMin => " °C",
            FeatureName::PrecipitationSum => " mm",
            FeatureName::RadiationSum => " MJ/m²",
            FeatureName::HumidityAvg | FeatureName::ClayPct | FeatureName::SandPct => " %",
            FeatureName::SiltPct => " %",
            FeatureName::VaporDeficit => " hPa",
            FeatureName::Gdd => " °C·d",
            FeatureName::OrganicCarbon | FeatureName::Nitrogen => " g/kg",
            FeatureName::BulkDensity => " kg/dm³",
            _ => "",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single feature slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Present(f64),
    Missing,
}

impl FeatureValue {
    pub fn as_option(self) -> Option<f64> {
        match self {
            FeatureValue::Present(v) => Some(v),
            FeatureValue::Missing => None,
        }
    }

    pub fn is_present(self) -> bool {
        matches!(self, FeatureValue::Present(_))
    }
}

/// Complete vector over the fixed schema. Every name always has a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    values: BTreeMap<FeatureName, FeatureValue>,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::empty()
    }
}

impl FeatureVector {
    /// All features `Missing`.
    pub fn empty() -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            values: FeatureName::ALL
                .iter()
                .map(|&n| (n, FeatureValue::Missing))
                .collect(),
        }
    }

    pub fn get(&self, name: FeatureName) -> FeatureValue {
        self.values
            .get(&name)
            .copied()
            .unwrap_or(FeatureValue::Missing)
    }

    pub fn value(&self, name: FeatureName) -> Option<f64> {
        self.get(name).as_option()
    }

    /// Set a value; non-finite input is stored as `Missing`.
    pub fn set(&mut self, name: FeatureName, value: f64) {
        let slot = if value.is_finite() {
            FeatureValue::Present(value)
        } else {
            FeatureValue::Missing
        };
        self.values.insert(name, slot);
    }

    /// Builder-style `set`, handy in tests and fixtures.
    pub fn with(mut self, name: FeatureName, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureName, FeatureValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn present_count(&self) -> usize {
        self.values.values().filter(|v| v.is_present()).count()
    }

    /// True when none of the features owned by `source` are present.
    pub fn lacks_source(&self, source: Source) -> bool {
        FeatureName::ALL
            .iter()
            .filter(|n| n.source() == source)
            .all(|n| !self.get(*n).is_present())
    }
}

/// Output of one fetcher: a subset of the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialFeatureVector {
    pub source: Source,
    values: Vec<(FeatureName, f64)>,
}

impl PartialFeatureVector {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            values: Vec::new(),
        }
    }

    /// Record a value; non-finite values are dropped.
    pub fn insert(&mut self, name: FeatureName, value: f64) {
        if value.is_finite() {
            self.values.retain(|(n, _)| *n != name);
            self.values.push((name, value));
        }
    }

    pub fn insert_opt(&mut self, name: FeatureName, value: Option<f64>) {
        if let Some(v) = value {
            self.insert(name, v);
        }
    }

    pub fn get(&self, name: FeatureName) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureName, f64)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Simplified USDA texture classes, encoded numerically for the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureClass {
    Sand,
    LoamySand,
    SandyLoam,
    SandyClayLoam,
    Loam,
    SiltLoam,
    Silt,
    ClayLoam,
    SiltyClayLoam,
    Clay,
    HeavyClay,
}

impl TextureClass {
    const ORDER: [TextureClass; 11] = [
        TextureClass::Sand,
        TextureClass::LoamySand,
        TextureClass::SandyLoam,
        TextureClass::SandyClayLoam,
        TextureClass::Loam,
        TextureClass::SiltLoam,
        TextureClass::Silt,
        TextureClass::ClayLoam,
        TextureClass::SiltyClayLoam,
        TextureClass::Clay,
        TextureClass::HeavyClay,
    ];

    /// Classify from fractions in percent.
    pub fn classify(clay: f64, sand: f64, silt: f64) -> Self {
        if clay >= 40.0 {
            TextureClass::HeavyClay
        } else if clay >= 35.0 {
            TextureClass::Clay
        } else if clay >= 27.0 {
            if sand >= 45.0 {
                TextureClass::SandyClayLoam
            } else {
                TextureClass::ClayLoam
            }
        } else if sand >= 85.0 {
            TextureClass::Sand
        } else if sand >= 70.0 {
            if silt >= 15.0 {
                TextureClass::SandyLoam
            } else {
                TextureClass::LoamySand
            }
        } else if sand >= 52.0 {
            TextureClass::SandyLoam
        } else if silt >= 80.0 {
            TextureClass::Silt
        } else if silt >= 50.0 {
            if clay >= 18.0 {
                TextureClass::SiltyClayLoam
            } else {
                TextureClass::SiltLoam
            }
        } else {
            TextureClass::Loam
        }
    }

    pub fn code(self) -> f64 {
        Self::ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or_default() as f64
    }

    pub fn from_code(code: f64) -> Option<Self> {
        if !code.is_finite() || code < 0.0 || code.fract() != 0.0 {
            return None;
        }
        Self::ORDER.get(code as usize).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            TextureClass::Sand => "sand",
            TextureClass::LoamySand => "loamy sand",
            TextureClass::SandyLoam => "sandy loam",
            TextureClass::SandyClayLoam => "sandy clay loam",
            TextureClass::Loam => "loam",
            TextureClass::SiltLoam => "silt loam",
            TextureClass::Silt => "silt",
            TextureClass::ClayLoam => "clay loam",
            TextureClass::SiltyClayLoam => "silty clay loam",
            TextureClass::Clay => "clay",
            TextureClass::HeavyClay => "heavy clay",
        }
    }
}
