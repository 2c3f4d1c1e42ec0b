// tests/common/mod.rs
//
// Shared fakes for the orchestrator and HTTP tests: a fixed-answer
// connectivity probe and fetchers that count calls, delay, or fail.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crop_advisor::aggregate::FeatureCache;
use crop_advisor::connectivity::{ConnectivityProbe, ConnectivityReport, TargetStatus};
use crop_advisor::coordinate::Coordinate;
use crop_advisor::error::FetchError;
use crop_advisor::features::{PartialFeatureVector, Source};
use crop_advisor::fetch::{ClimateFetcher, EnvironmentalFetcher, SoilFetcher, VegetationFetcher};
use crop_advisor::model::SuitabilityModel;
use crop_advisor::orchestrator::{Orchestrator, OrchestratorBuilder};

pub const CLIMATE: &str = include_str!("../fixtures/open_meteo_archive.json");
pub const VEGETATION: &str = include_str!("../fixtures/ornl_modis_ndvi.json");
pub const SOIL: &str = include_str!("../fixtures/soilgrids_properties.json");

pub struct StaticProbe {
    pub reachable: bool,
    pub checks: AtomicU32,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable,
            checks: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn check(&self, targets: &[String]) -> ConnectivityReport {
        self.checks.fetch_add(1, Ordering::SeqCst);
        ConnectivityReport::from_targets(
            targets
                .iter()
                .map(|host| TargetStatus {
                    host: host.clone(),
                    resolved: self.reachable,
                    reachable: self.reachable,
                    secure: self.reachable,
                    note: (!self.reachable).then(|| "dns: stubbed failure".to_string()),
                })
                .collect(),
        )
    }
}

enum Behaviour {
    Delegate(Box<dyn EnvironmentalFetcher>),
    Fail(FetchError),
}

/// Wraps a fixture fetcher (or a fixed failure) and counts attempts.
pub struct Scripted {
    source: Source,
    behaviour: Behaviour,
    delay: Duration,
    calls: AtomicU32,
}

impl Scripted {
    pub fn fixture(source: Source) -> Arc<Self> {
        Self::slow_fixture(source, Duration::ZERO)
    }

    /// Fixture fetcher that sleeps `delay` before answering.
    pub fn slow_fixture(source: Source, delay: Duration) -> Arc<Self> {
        let inner: Box<dyn EnvironmentalFetcher> = match source {
            Source::Climate => Box::new(ClimateFetcher::from_fixture(CLIMATE)),
            Source::Vegetation => Box::new(VegetationFetcher::from_fixture(VEGETATION)),
            Source::Soil => Box::new(SoilFetcher::from_fixture(SOIL)),
        };
        Arc::new(Self {
            source,
            behaviour: Behaviour::Delegate(inner),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(source: Source, err: FetchError) -> Arc<Self> {
        Arc::new(Self {
            source,
            behaviour: Behaviour::Fail(err),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentalFetcher for Scripted {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self, coordinate: Coordinate) -> Result<PartialFeatureVector, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behaviour {
            Behaviour::Delegate(inner) => inner.fetch(coordinate).await,
            Behaviour::Fail(e) => Err(e.clone()),
        }
    }
}

pub fn cache() -> FeatureCache {
    FeatureCache::new(Duration::from_secs(3600), Duration::from_secs(600))
}

/// Builder with the embedded model, a fixed probe and one target host.
pub fn builder(probe: Arc<StaticProbe>) -> OrchestratorBuilder {
    let model = SuitabilityModel::embedded().expect("embedded model");
    Orchestrator::builder(probe, Arc::new(model), cache()).targets(vec!["example.org".into()])
}

pub fn with_fetchers(probe: Arc<StaticProbe>, fetchers: &[Arc<Scripted>]) -> Orchestrator {
    fetchers
        .iter()
        .fold(builder(probe), |b, f| b.fetcher(f.clone()))
        .build()
}
