//! # Suitability scoring engine
//!
//! Loads the crop suitability artifact (JSON), checks it against the feature
//! schema, and scores a feature vector for each candidate crop.
//!
//! score      = 100 · Σ wᵢ·rᵢ / Σ wᵢ
//! confidence = Σ w of terms whose feature was present / Σ wᵢ
//!
//! Missing features go through the artifact's imputation policy; they count
//! toward the score but not toward confidence.

pub mod curve;
pub mod risk;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ModelError;
use crate::features::{FeatureName, FeatureValue, FeatureVector, TextureClass, FEATURE_SCHEMA_VERSION};

pub use curve::Curve;
pub use risk::{RiskAssessment, RiskLevel, RiskProfile};

/// Built-in artifact shipped with the crate.
pub const EMBEDDED_MODEL: &str = include_str!("../../models/crop_suitability.json");

/// Number of rationale statements per candidate.
const RATIONALE_LEN: usize = 3;

/// How to treat a feature that is `Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    /// Substitute this feature value and run it through the curve.
    Value(f64),
    /// Use this response directly.
    Response(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub feature: FeatureName,
    pub weight: f64,
    pub curve: Curve,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropModel {
    pub id: String,
    pub name: String,
    pub terms: Vec<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Artifact {
    schema_version: u32,
    model_id: String,
    imputation: BTreeMap<FeatureName, Imputation>,
    crops: Vec<CropModel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuitabilityBand {
    High,
    Good,
    Moderate,
    Low,
}

impl SuitabilityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            SuitabilityBand::High
        } else if score >= 60.0 {
            SuitabilityBand::Good
        } else if score >= 40.0 {
            SuitabilityBand::Moderate
        } else {
            SuitabilityBand::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SuitabilityBand::High => "high suitability",
            SuitabilityBand::Good => "good suitability",
            SuitabilityBand::Moderate => "moderate suitability",
            SuitabilityBand::Low => "low suitability",
        }
    }
}

impl fmt::Display for SuitabilityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-term breakdown of a candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermScore {
    pub feature: FeatureName,
    pub weight: f64,
    pub response: f64,
    /// `false` when the imputation policy stood in for the feature.
    pub present: bool,
}

impl TermScore {
    pub fn contribution(&self) -> f64 {
        self.weight * self.response
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropCandidate {
    pub crop_id: String,
    pub name: String,
    pub score: f64,
    pub confidence: f64,
    pub band: SuitabilityBand,
    pub rationale: Vec<String>,
    pub breakdown: Vec<TermScore>,
    pub risk: RiskAssessment,
}

#[derive(Debug, Clone)]
pub struct SuitabilityModel {
    artifact: Artifact,
}

impl SuitabilityModel {
    /// The artifact compiled into the binary.
    pub fn embedded() -> Result<Self, ModelError> {
        Self::from_json(EMBEDDED_MODEL)
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Invalid(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&s)
    }

    /// Parse and validate an artifact.
    pub fn from_json(s: &str) -> Result<Self, ModelError> {
        let artifact: Artifact =
            serde_json::from_str(s).map_err(|e| ModelError::Invalid(e.to_string()))?;
        let model = Self { artifact };
        model.validate()?;
        info!(
            target: "advisor::model",
            model_id = %model.artifact.model_id,
            crops = model.artifact.crops.len(),
            "suitability model loaded"
        );
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let a = &self.artifact;
        if a.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ModelError::SchemaMismatch(format!(
                "artifact targets feature schema v{}, runtime provides v{FEATURE_SCHEMA_VERSION}",
                a.schema_version
            )));
        }
        if a.crops.is_empty() {
            return Err(ModelError::Invalid("artifact lists no crops".into()));
        }
        for (feature, policy) in &a.imputation {
            if let Imputation::Response(r) = policy {
                if !(0.0..=1.0).contains(r) {
                    return Err(ModelError::Invalid(format!(
                        "imputed response for {feature} must be within [0, 1]"
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for crop in &a.crops {
            if !seen.insert(crop.id.as_str()) {
                return Err(ModelError::Invalid(format!("duplicate crop id {}", crop.id)));
            }
            if crop.terms.is_empty() {
                return Err(ModelError::Invalid(format!("crop {} has no terms", crop.id)));
            }
            for term in &crop.terms {
                if !term.weight.is_finite() || term.weight <= 0.0 {
                    return Err(ModelError::Invalid(format!(
                        "crop {}: weight of {} must be positive",
                        crop.id, term.feature
                    )));
                }
                if !a.imputation.contains_key(&term.feature) {
                    return Err(ModelError::SchemaMismatch(format!(
                        "crop {}: feature {} has no imputation policy",
                        crop.id, term.feature
                    )));
                }
                if matches!(term.curve, Curve::OneOf { .. })
                    && term.feature != FeatureName::TextureClass
                {
                    return Err(ModelError::Invalid(format!(
                        "crop {}: one_of applies only to texture_class",
                        crop.id
                    )));
                }
                term.curve
                    .check()
                    .map_err(|why| ModelError::Invalid(format!("crop {}: {why}", crop.id)))?;
            }
        }
        Ok(())
    }

    pub fn model_id(&self) -> &str {
        &self.artifact.model_id
    }

    pub fn schema_version(&self) -> u32 {
        self.artifact.schema_version
    }

    pub fn crop_ids(&self) -> impl Iterator<Item = &str> {
        self.artifact.crops.iter().map(|c| c.id.as_str())
    }

    /// Score every crop in the artifact.
    pub fn score_all(&self, vector: &FeatureVector) -> Result<Vec<CropCandidate>, ModelError> {
        self.rank(vector, self.artifact.crops.iter())
    }

    /// Score the named candidates; unknown ids are ignored.
    pub fn score(
        &self,
        vector: &FeatureVector,
        candidates: &[String],
    ) -> Result<Vec<CropCandidate>, ModelError> {
        let wanted: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        self.rank(
            vector,
            self.artifact
                .crops
                .iter()
                .filter(|c| wanted.contains(c.id.as_str())),
        )
    }

    fn rank<'a>(
        &self,
        vector: &FeatureVector,
        crops: impl Iterator<Item = &'a CropModel>,
    ) -> Result<Vec<CropCandidate>, ModelError> {
        if vector.schema_version != self.artifact.schema_version {
            return Err(ModelError::SchemaMismatch(format!(
                "feature vector is v{}, model expects v{}",
                vector.schema_version, self.artifact.schema_version
            )));
        }
        let mut out: Vec<CropCandidate> = crops.map(|c| self.score_crop(c, vector)).collect();
        out.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.crop_id.cmp(&b.crop_id))
        });
        Ok(out)
    }

    fn score_crop(&self, crop: &CropModel, vector: &FeatureVector) -> CropCandidate {
        let breakdown: Vec<TermScore> = crop
            .terms
            .iter()
            .map(|t| {
                let (response, present) = match vector.get(t.feature) {
                    FeatureValue::Present(x) => (t.curve.response(x), true),
                    FeatureValue::Missing => match self.artifact.imputation.get(&t.feature) {
                        Some(Imputation::Value(x)) => (t.curve.response(*x), false),
                        Some(Imputation::Response(r)) => (*r, false),
                        None => (0.0, false),
                    },
                };
                TermScore {
                    feature: t.feature,
                    weight: t.weight,
                    response,
                    present,
                }
            })
            .collect();

        let total: f64 = breakdown.iter().map(|t| t.weight).sum();
        let weighted: f64 = breakdown.iter().map(TermScore::contribution).sum();
        let present: f64 = breakdown.iter().filter(|t| t.present).map(|t| t.weight).sum();
        let (score, confidence) = if total > 0.0 {
            (100.0 * weighted / total, present / total)
        } else {
            (0.0, 0.0)
        };

        CropCandidate {
            crop_id: crop.id.clone(),
            name: crop.name.clone(),
            score,
            confidence,
            band: SuitabilityBand::from_score(score),
            rationale: rationale(crop, vector, &breakdown),
            breakdown,
            risk: risk::assess(crop.risk.as_ref(), vector),
        }
    }
}

/// Up to three statements for the present terms with the largest contribution.
fn rationale(crop: &CropModel, vector: &FeatureVector, breakdown: &[TermScore]) -> Vec<String> {
    let mut ranked: Vec<(usize, &TermScore)> = breakdown
        .iter()
        .enumerate()
        .filter(|(_, t)| t.present && t.contribution() > 0.0)
        .collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        b.contribution()
            .total_cmp(&a.contribution())
            .then_with(|| ia.cmp(ib))
    });
    ranked
        .into_iter()
        .take(RATIONALE_LEN)
        .filter_map(|(i, t)| {
            let term = &crop.terms[i];
            vector.value(t.feature).map(|x| describe(term, x, t.response))
        })
        .collect()
}

fn num(v: f64) -> String {
    let a = v.abs();
    if a >= 100.0 {
        format!("{v:.0}")
    } else if a >= 10.0 {
        format!("{v:.1}")
    } else {
        format!("{v:.2}")
    }
}

fn describe(term: &Term, x: f64, response: f64) -> String {
    let f = term.feature;
    let (label, unit) = (f.label(), f.unit());
    match &term.curve {
        Curve::Band { low, high, .. } if (*low..=*high).contains(&x) => format!(
            "{label} of {}{unit} is within the optimal {}–{}{unit} range",
            num(x),
            num(*low),
            num(*high)
        ),
        Curve::Band { low, high, .. } => format!(
            "{label} of {}{unit} is outside the optimal {}–{}{unit} range",
            num(x),
            num(*low),
            num(*high)
        ),
        Curve::Optimum { minimum, .. } if x < *minimum => format!(
            "{label} of {}{unit} is below the {}{unit} minimum",
            num(x),
            num(*minimum)
        ),
        Curve::Optimum { optimum, .. } if response >= 0.8 => format!(
            "{label} of {}{unit} is close to the {}{unit} optimum",
            num(x),
            num(*optimum)
        ),
        Curve::Optimum { optimum, .. } => format!(
            "{label} of {}{unit} deviates from the {}{unit} optimum",
            num(x),
            num(*optimum)
        ),
        Curve::AtLeast { target } if response >= 1.0 => format!(
            "{label} of {}{unit} meets the {}{unit} requirement",
            num(x),
            num(*target)
        ),
        Curve::AtLeast { target } => format!(
            "{label} of {}{unit} covers {:.0}% of the {}{unit} requirement",
            num(x),
            response * 100.0,
            num(*target)
        ),
        Curve::Floor { limit, .. } if x >= *limit => format!(
            "{label} of {}{unit} stays above the {}{unit} tolerance limit",
            num(x),
            num(*limit)
        ),
        Curve::Floor { limit, .. } => format!(
            "{label} of {}{unit} falls below the {}{unit} tolerance limit",
            num(x),
            num(*limit)
        ),
        Curve::OneOf { .. } => {
            let class = TextureClass::from_code(x).map_or("unknown", TextureClass::label);
            if response >= 1.0 {
                format!("{label} ({class}) is among the preferred textures")
            } else {
                format!("{label} ({class}) is not a preferred texture")
            }
        }
    }
}
