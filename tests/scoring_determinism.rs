// tests/scoring_determinism.rs
//
// Property-style checks of the embedded suitability model over seeded
// random feature vectors (reproducible: fixed StdRng seeds).
//
// Covered:
// - score in [0, 100], confidence in [0, 1], band consistent with score
// - ranking is descending by score, ties broken by crop id
// - identical input gives identical output
// - confidence is 1 with every feature present and drops when one goes missing
// - `score` with a candidate subset preserves the global order

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crop_advisor::features::{FeatureName, FeatureVector};
use crop_advisor::model::{SuitabilityBand, SuitabilityModel};

fn model() -> SuitabilityModel {
    SuitabilityModel::embedded().expect("embedded model is valid")
}

/// Plausible-range value for a feature.
fn sample(rng: &mut StdRng, name: FeatureName) -> f64 {
    match name {
        FeatureName::TemperatureAvg => rng.random_range(-5.0..35.0),
        FeatureName::TemperatureMax => rng.random_range(10.0..48.0),
        FeatureName::TemperatureMin => rng.random_range(-35.0..15.0),
        FeatureName::PrecipitationSum => rng.random_range(0.0..2500.0),
        FeatureName::RadiationSum => rng.random_range(500.0..8000.0),
        FeatureName::HumidityAvg => rng.random_range(10.0..100.0),
        FeatureName::VaporDeficit => rng.random_range(0.0..40.0),
        FeatureName::Gdd => rng.random_range(0.0..5000.0),
        FeatureName::Gtk => rng.random_range(0.0..3.0),
        FeatureName::Spi => rng.random_range(-3.0..3.0),
        FeatureName::TextureClass => f64::from(rng.random_range(0u8..11)),
        FeatureName::Ph => rng.random_range(3.5..9.5),
        FeatureName::NdviMean | FeatureName::NdviMax => rng.random_range(-0.1..0.95),
        FeatureName::NdviTrend => rng.random_range(-0.1..0.1),
        _ => rng.random_range(0.0..100.0),
    }
}

fn random_vector(rng: &mut StdRng, present_ratio: f64) -> FeatureVector {
    let mut v = FeatureVector::empty();
    for name in FeatureName::ALL {
        if rng.random_bool(present_ratio) {
            v.set(name, sample(rng, name));
        }
    }
    v
}

#[test]
fn random_vectors_stay_within_bounds_and_ranked() {
    let m = model();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for _ in 0..500 {
        let v = random_vector(&mut rng, 0.7);
        let ranked = m.score_all(&v).expect("schema matches");
        assert_eq!(ranked.len(), m.crop_ids().count());

        for c in &ranked {
            assert!((0.0..=100.0).contains(&c.score), "{}: score {}", c.crop_id, c.score);
            assert!(
                (0.0..=1.0).contains(&c.confidence),
                "{}: confidence {}",
                c.crop_id,
                c.confidence
            );
            assert_eq!(c.band, SuitabilityBand::from_score(c.score));
            assert!(c.rationale.len() <= 3);
        }
        for pair in ranked.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.score > b.score || (a.score == b.score && a.crop_id < b.crop_id),
                "order violated: {} ({}) before {} ({})",
                a.crop_id,
                a.score,
                b.crop_id,
                b.score
            );
        }
    }
}

#[test]
fn same_input_same_output() {
    let m = model();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let v = random_vector(&mut rng, 0.5);
        assert_eq!(m.score_all(&v).unwrap(), m.score_all(&v.clone()).unwrap());
    }
}

#[test]
fn confidence_tracks_present_features() {
    let m = model();
    let mut rng = StdRng::seed_from_u64(2024);

    let mut full = FeatureVector::empty();
    for name in FeatureName::ALL {
        full.set(name, sample(&mut rng, name));
    }
    for c in m.score_all(&full).unwrap() {
        assert!((c.confidence - 1.0).abs() < 1e-12, "{}: {}", c.crop_id, c.confidence);
        assert!(c.breakdown.iter().all(|t| t.present));
    }

    let mut partial = full.clone();
    partial.set(FeatureName::NdviMax, f64::NAN);
    for c in m.score_all(&partial).unwrap() {
        assert!(c.confidence < 1.0, "{} should lose confidence", c.crop_id);
        let ndvi = c
            .breakdown
            .iter()
            .find(|t| t.feature == FeatureName::NdviMax)
            .expect("every crop scores ndvi_max");
        assert!(!ndvi.present);
    }
}

#[test]
fn candidate_subset_keeps_relative_order() {
    let m = model();
    let mut rng = StdRng::seed_from_u64(99);
    let v = random_vector(&mut rng, 0.9);

    let all: Vec<String> = m
        .score_all(&v)
        .unwrap()
        .into_iter()
        .map(|c| c.crop_id)
        .collect();
    let wanted = vec![all[3].clone(), all[0].clone(), "not-a-crop".to_string()];

    let subset: Vec<String> = m
        .score(&v, &wanted)
        .unwrap()
        .into_iter()
        .map(|c| c.crop_id)
        .collect();
    assert_eq!(subset, vec![all[0].clone(), all[3].clone()]);
}
