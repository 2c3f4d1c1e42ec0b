//! Per-crop climate risk: drought, frost, excess moisture and heat deficit
//! scored 0–100 (higher is riskier) and combined with fixed weights.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::features::{FeatureName, FeatureVector};

const DROUGHT_WEIGHT: f64 = 0.35;
const FROST_WEIGHT: f64 = 0.25;
const EXCESS_MOISTURE_WEIGHT: f64 = 0.20;
const HEAT_DEFICIT_WEIGHT: f64 = 0.20;

/// Crop tolerances the risk factors are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Lowest air temperature (°C) the crop survives without damage.
    pub frost_tolerance: f64,
    /// Growing degree days needed to reach maturity.
    pub gdd_required: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    Elevated,
    High,
}

impl RiskLevel {
    pub fn from_total(total: f64) -> Self {
        if total < 20.0 {
            RiskLevel::Low
        } else if total < 40.0 {
            RiskLevel::Moderate
        } else if total < 60.0 {
            RiskLevel::Elevated
        } else {
            RiskLevel::High
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "low risk",
            RiskLevel::Moderate => "moderate risk",
            RiskLevel::Elevated => "elevated risk",
            RiskLevel::High => "high risk",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            RiskLevel::Low => "conditions favour cultivation",
            RiskLevel::Moderate => "standard agronomic practice is sufficient",
            RiskLevel::Elevated => "additional protective measures are needed",
            RiskLevel::High => "consider alternative crops",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub total: f64,
    pub level: RiskLevel,
    pub recommendation: &'static str,
    pub drought: f64,
    pub frost: f64,
    pub excess_moisture: f64,
    pub heat_deficit: f64,
}

/// Assess a crop's exposure at the location described by `vector`.
/// Missing inputs fall back to fixed moderate scores.
pub fn assess(profile: Option<&RiskProfile>, vector: &FeatureVector) -> RiskAssessment {
    let drought = match vector.value(FeatureName::Spi) {
        Some(spi) if spi < -2.0 => 90.0,
        Some(spi) if spi < -1.5 => 60.0,
        Some(spi) if spi < -1.0 => 30.0,
        Some(_) => 10.0,
        None => 20.0,
    };

    let frost = match (vector.value(FeatureName::TemperatureMin), profile) {
        (None, _) => 15.0,
        (Some(_), None) => 20.0,
        (Some(t), Some(p)) if t < p.frost_tolerance - 5.0 => 80.0,
        (Some(t), Some(p)) if t < p.frost_tolerance => 50.0,
        (Some(t), Some(p)) if t < p.frost_tolerance + 2.0 => 20.0,
        (Some(_), Some(_)) => 5.0,
    };

    let excess_moisture = match vector.value(FeatureName::Gtk) {
        Some(gtk) if gtk > 2.0 => 70.0,
        Some(gtk) if gtk > 1.6 => 40.0,
        Some(_) => 10.0,
        None => 15.0,
    };

    let heat_deficit = match (vector.value(FeatureName::Gdd), profile) {
        (None, _) => 25.0,
        (Some(_), None) => 20.0,
        (Some(gdd), Some(p)) => {
            let ratio = gdd / p.gdd_required;
            if ratio < 0.75 {
                80.0
            } else if ratio < 0.9 {
                50.0
            } else if ratio < 1.0 {
                20.0
            } else {
                5.0
            }
        }
    };

    let total = drought * DROUGHT_WEIGHT
        + frost * FROST_WEIGHT
        + excess_moisture * EXCESS_MOISTURE_WEIGHT
        + heat_deficit * HEAT_DEFICIT_WEIGHT;
    let level = RiskLevel::from_total(total);
    RiskAssessment {
        total,
        level,
        recommendation: level.recommendation(),
        drought,
        frost,
        excess_moisture,
        heat_deficit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORN: RiskProfile = RiskProfile {
        frost_tolerance: 0.0,
        gdd_required: 2700.0,
    };

    fn close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} vs {b}");
    }

    #[test]
    fn nothing_known_gives_the_default_mix() {
        let r = assess(None, &FeatureVector::empty());
        assert_eq!(
            (r.drought, r.frost, r.excess_moisture, r.heat_deficit),
            (20.0, 15.0, 15.0, 25.0)
        );
        // 7 + 3.75 + 3 + 5
        close(r.total, 18.75);
        assert_eq!(r.level, RiskLevel::Low);
    }

    #[test]
    fn frosty_dry_short_season_is_high_risk() {
        let v = FeatureVector::empty()
            .with(FeatureName::Spi, -2.4)
            .with(FeatureName::TemperatureMin, -8.0)
            .with(FeatureName::Gtk, 0.4)
            .with(FeatureName::Gdd, 1500.0);
        let r = assess(Some(&CORN), &v);
        assert_eq!(
            (r.drought, r.frost, r.excess_moisture, r.heat_deficit),
            (90.0, 80.0, 10.0, 80.0)
        );
        close(r.total, 31.5 + 20.0 + 2.0 + 16.0);
        assert_eq!(r.level, RiskLevel::High);
        assert_eq!(r.recommendation, "consider alternative crops");
    }

    #[test]
    fn factor_thresholds_are_strict() {
        let v = FeatureVector::empty()
            .with(FeatureName::Spi, -1.0)
            .with(FeatureName::TemperatureMin, 2.0)
            .with(FeatureName::Gtk, 1.6)
            .with(FeatureName::Gdd, 2700.0);
        let r = assess(Some(&CORN), &v);
        assert_eq!(
            (r.drought, r.frost, r.excess_moisture, r.heat_deficit),
            (10.0, 5.0, 10.0, 5.0)
        );

        let wet = FeatureVector::empty()
            .with(FeatureName::Gtk, 2.5)
            .with(FeatureName::TemperatureMin, 1.0)
            .with(FeatureName::Gdd, 2500.0);
        let r = assess(Some(&CORN), &wet);
        assert_eq!((r.frost, r.excess_moisture, r.heat_deficit), (20.0, 70.0, 20.0));
    }

    #[test]
    fn unknown_crop_uses_neutral_scores_when_data_exists() {
        let v = FeatureVector::empty()
            .with(FeatureName::TemperatureMin, -30.0)
            .with(FeatureName::Gdd, 100.0);
        let r = assess(None, &v);
        assert_eq!((r.frost, r.heat_deficit), (20.0, 20.0));
    }

    #[test]
    fn levels_follow_thresholds() {
        assert_eq!(RiskLevel::from_total(19.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_total(20.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_total(45.0), RiskLevel::Elevated);
        assert_eq!(RiskLevel::from_total(60.0), RiskLevel::High);
    }
}
