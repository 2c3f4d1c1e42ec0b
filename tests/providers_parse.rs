// tests/providers_parse.rs
//
// Offline provider normalisation from canned payloads (no network).
//
// Covered:
// - Open-Meteo daily archive -> climate features (sums, means, extremes, GDD, GTK)
// - ORNL MODIS subset -> NDVI statistics with fill values dropped
// - SoilGrids properties -> root-zone means, d_factor scaling, texture class
// - empty / undecodable payloads classify as Validation / Transient

use crop_advisor::coordinate::Coordinate;
use crop_advisor::error::FailureClass;
use crop_advisor::features::{FeatureName, Source, TextureClass};
use crop_advisor::fetch::{ClimateFetcher, EnvironmentalFetcher, SoilFetcher, VegetationFetcher};

const CLIMATE: &str = include_str!("fixtures/open_meteo_archive.json");
const VEGETATION: &str = include_str!("fixtures/ornl_modis_ndvi.json");
const SOIL: &str = include_str!("fixtures/soilgrids_properties.json");

fn here() -> Coordinate {
    Coordinate::new(45.0, 10.0).expect("valid coordinate")
}

fn close(actual: Option<f64>, expected: f64, tol: f64) {
    let a = actual.expect("feature should be present");
    assert!(
        (a - expected).abs() <= tol,
        "expected {expected} ± {tol}, got {a}"
    );
}

#[tokio::test]
async fn climate_archive_normalises_to_expected_features() {
    let f = ClimateFetcher::from_fixture(CLIMATE);
    assert_eq!(f.source(), Source::Climate);

    let v = f.fetch(here()).await.expect("climate fixture parses");
    assert_eq!(v.source, Source::Climate);

    // Nine non-null daily means.
    close(v.get(FeatureName::TemperatureAvg), 181.0 / 9.0, 1e-9);
    close(v.get(FeatureName::TemperatureMax), 33.0, 1e-9);
    close(v.get(FeatureName::TemperatureMin), 4.0, 1e-9);
    close(v.get(FeatureName::PrecipitationSum), 24.0, 1e-9);
    close(v.get(FeatureName::RadiationSum), 186.0, 1e-9);
    close(v.get(FeatureName::HumidityAvg), 562.0 / 9.0, 1e-9);
    close(v.get(FeatureName::Gdd), 93.0, 1e-9);
    // All 24 mm of rain over a tenth of the 93 °C excess above 10 °C.
    close(v.get(FeatureName::Gtk), 24.0 / 9.3, 1e-9);
    // Nine days of rain are too short a record for SPI.
    assert!(v.get(FeatureName::Spi).is_none());

    let vpd = v.get(FeatureName::VaporDeficit).expect("vpd present");
    assert!(vpd > 5.0 && vpd < 20.0, "vpd {vpd} hPa out of plausible range");

    // No soil or vegetation features leak from a climate payload.
    assert!(v.get(FeatureName::NdviMean).is_none());
    assert!(v.get(FeatureName::Ph).is_none());
}

#[tokio::test]
async fn modis_subset_skips_fill_values() {
    let v = VegetationFetcher::from_fixture(VEGETATION)
        .fetch(here())
        .await
        .expect("modis fixture parses");

    assert_eq!(v.source, Source::Vegetation);
    close(v.get(FeatureName::NdviMean), 0.6, 1e-9);
    close(v.get(FeatureName::NdviMax), 0.7, 1e-9);
    close(v.get(FeatureName::NdviTrend), 0.1, 1e-9);

    let lai = v.get(FeatureName::Lai).expect("lai present");
    let fpar = v.get(FeatureName::Fpar).expect("fpar present");
    assert!(lai > 0.0 && lai <= 8.0);
    assert!(fpar > 0.0 && fpar < 1.0);
}

#[tokio::test]
async fn soilgrids_layers_are_scaled_and_classified() {
    let v = SoilFetcher::from_fixture(SOIL)
        .fetch(here())
        .await
        .expect("soilgrids fixture parses");

    assert_eq!(v.source, Source::Soil);
    close(v.get(FeatureName::ClayPct), 25.0, 1e-9);
    close(v.get(FeatureName::SandPct), 35.0, 1e-9);
    close(v.get(FeatureName::SiltPct), 40.0, 1e-9);
    close(v.get(FeatureName::OrganicCarbon), 12.0, 1e-9);
    close(v.get(FeatureName::Nitrogen), 1.5, 1e-9);
    close(v.get(FeatureName::Ph), 6.5, 1e-9);
    close(v.get(FeatureName::BulkDensity), 1.35, 1e-9);

    let code = v.get(FeatureName::TextureClass).expect("texture present");
    assert_eq!(TextureClass::from_code(code), Some(TextureClass::Loam));
}

#[tokio::test]
async fn empty_payloads_are_validation_failures() {
    let e = ClimateFetcher::from_fixture(r#"{"daily":{"time":[],"temperature_2m_mean":[]}}"#)
        .fetch(here())
        .await
        .unwrap_err();
    assert_eq!(e.class, FailureClass::Validation);

    let e = VegetationFetcher::from_fixture(
        r#"{"scale":"0.0001","subset":[{"modis_date":"A2024001","band":"250m_16_days_NDVI","data":[-3000]}]}"#,
    )
    .fetch(here())
    .await
    .unwrap_err();
    assert_eq!(e.class, FailureClass::Validation);

    let e = SoilFetcher::from_fixture(r#"{"properties":{"layers":[]}}"#)
        .fetch(here())
        .await
        .unwrap_err();
    assert_eq!(e.class, FailureClass::Validation);
}

#[tokio::test]
async fn undecodable_payload_is_transient() {
    let e = SoilFetcher::from_fixture("<html>502 Bad Gateway</html>")
        .fetch(here())
        .await
        .unwrap_err();
    assert_eq!(e.class, FailureClass::Transient);
}
