//! Plain-text rendering of a recommendation for the messaging front-end.

use std::fmt::Write as _;

use crate::features::{FeatureName, TextureClass};
use crate::indices::{GtkClass, SpiClass};
use crate::orchestrator::RecommendationResult;

/// Render the ranked candidates, their rationale and a short data summary.
pub fn render(result: &RecommendationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Crop suitability for {}", result.coordinate);
    out.push('\n');

    if result.candidates.is_empty() {
        out.push_str("No crop could be scored for this location.\n");
    }
    for (i, c) in result.candidates.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {}: {:.1}% ({}, confidence {:.0}%)",
            i + 1,
            c.name,
            c.score,
            c.band,
            c.confidence * 100.0
        );
        for line in &c.rationale {
            let _ = writeln!(out, "   - {line}");
        }
        let _ = writeln!(
            out,
            "   Climate risk: {} ({:.0}/100), {}",
            c.risk.level, c.risk.total, c.risk.recommendation
        );
    }

    let summary = summary(result);
    if !summary.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Site: {}", summary.join(", "));
    }

    if !result.degraded_sources.is_empty() {
        let names: Vec<&str> = result.degraded_sources.iter().map(|s| s.as_str()).collect();
        out.push('\n');
        let _ = writeln!(
            out,
            "Note: {} data was unavailable; the ranking relies on defaults for it.",
            names.join(" and ")
        );
    }
    out
}

fn summary(result: &RecommendationResult) -> Vec<String> {
    let f = &result.features;
    let mut parts = Vec::new();
    if let Some(t) = f.value(FeatureName::TemperatureAvg) {
        parts.push(format!("mean {t:.1} °C"));
    }
    if let Some(p) = f.value(FeatureName::PrecipitationSum) {
        parts.push(format!("{p:.0} mm/yr"));
    }
    if let Some(g) = f.value(FeatureName::Gdd) {
        parts.push(format!("GDD {g:.0}"));
    }
    if let Some(gtk) = f.value(FeatureName::Gtk) {
        parts.push(format!("GTK {gtk:.2} ({})", GtkClass::from_value(gtk)));
    }
    if let Some(spi) = f.value(FeatureName::Spi) {
        parts.push(format!("SPI {spi:.2} ({})", SpiClass::from_value(spi)));
    }
    if let Some(class) = f
        .value(FeatureName::TextureClass)
        .and_then(TextureClass::from_code)
    {
        parts.push(class.label().to_string());
    }
    if let Some(ph) = f.value(FeatureName::Ph) {
        parts.push(format!("pH {ph:.1}"));
    }
    parts
}
