//! # Recommendation orchestrator
//!
//! Drives one request through
//! `Idle → ConnectivityChecked → Fetching → Aggregating → Scoring → Done`
//! (or `Failed`). Requests for the same user and rounded coordinate share a
//! single flight: the first caller spawns it, later callers attach to it.
//! Below that, the probe-and-fetch phase is shared per rounded coordinate, so
//! concurrent users asking about the same place trigger one fetch batch. A
//! caller that gives up only detaches; a flight is cancelled when its last
//! waiter leaves.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::{join_all, FutureExt};
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::{Aggregator, FeatureCache, Fetched, Resolved};
use crate::config::AppConfig;
use crate::connectivity::{check_connectivity, ConnectivityProbe, NetworkProber};
use crate::coordinate::{CoordKey, Coordinate};
use crate::error::{FailureClass, ModelError, RetryError, UserFacing};
use crate::features::{FeatureVector, Source};
use crate::fetch::{ClimateFetcher, EnvironmentalFetcher, SoilFetcher, VegetationFetcher};
use crate::flight::{FlightError, SingleFlight};
use crate::model::{CropCandidate, SuitabilityModel};
use crate::retry::{AttemptContext, Executor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    ConnectivityChecked,
    Fetching,
    Aggregating,
    Scoring,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("mandatory source exhausted after {attempts} attempts")]
    MandatorySourceExhausted { attempts: u32 },
    #[error("mandatory source rejected the request ({0})")]
    MandatorySourceRejected(FailureClass),
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("flight task aborted")]
    Internal,
}

impl FailureCause {
    pub fn category(&self) -> UserFacing {
        match self {
            FailureCause::MandatorySourceRejected(FailureClass::Auth)
            | FailureCause::SchemaMismatch(_) => UserFacing::ServiceMisconfigured,
            FailureCause::MandatorySourceRejected(_) | FailureCause::InvalidLocation(_) => {
                UserFacing::InvalidLocation
            }
            FailureCause::MandatorySourceExhausted { .. }
            | FailureCause::NetworkUnreachable
            | FailureCause::Cancelled
            | FailureCause::Internal => UserFacing::TemporarilyUnavailable,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            FailureCause::MandatorySourceExhausted { .. } => "mandatory_exhausted",
            FailureCause::MandatorySourceRejected(_) => "mandatory_rejected",
            FailureCause::NetworkUnreachable => "network_unreachable",
            FailureCause::SchemaMismatch(_) => "schema_mismatch",
            FailureCause::InvalidLocation(_) => "invalid_location",
            FailureCause::Cancelled => "cancelled",
            FailureCause::Internal => "internal",
        }
    }
}

/// Terminal failure of a request, with the stage it failed in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request failed during {stage:?}: {cause}")]
pub struct RequestFailure {
    pub stage: Stage,
    pub cause: FailureCause,
    /// Stages visited, ending with `Failed`.
    pub stages: Vec<Stage>,
}

impl RequestFailure {
    fn new(cause: FailureCause, mut stages: Vec<Stage>) -> Self {
        let stage = stages.last().copied().unwrap_or(Stage::Idle);
        stages.push(Stage::Failed);
        Self {
            stage,
            cause,
            stages,
        }
    }

    pub fn category(&self) -> UserFacing {
        self.cause.category()
    }

    pub fn is_mandatory_source_exhausted(&self) -> bool {
        matches!(self.cause, FailureCause::MandatorySourceExhausted { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResult {
    pub coordinate: Coordinate,
    pub candidates: Vec<CropCandidate>,
    pub features: FeatureVector,
    pub degraded_sources: Vec<Source>,
    pub from_cache: bool,
    pub data_fetched_at: DateTime<Utc>,
    pub model_id: String,
    pub generated_at: DateTime<Utc>,
    pub stages: Vec<Stage>,
}

type FlightOutput = Result<RecommendationResult, RequestFailure>;
type FlightKey = (String, CoordKey);

/// Failed fetch phase, with the stages it got through after `Idle`.
#[derive(Debug, Clone)]
struct FetchFailure {
    cause: FailureCause,
    reached: Vec<Stage>,
}

type FetchOutput = Result<Resolved, FetchFailure>;

struct Inner {
    probe: Arc<dyn ConnectivityProbe>,
    targets: Vec<String>,
    fetchers: Vec<Arc<dyn EnvironmentalFetcher>>,
    executor: Executor,
    aggregator: Aggregator,
    model: Arc<SuitabilityModel>,
    top_n: usize,
    requests: SingleFlight<FlightKey, FlightOutput>,
    fetches: SingleFlight<CoordKey, FetchOutput>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    probe: Arc<dyn ConnectivityProbe>,
    model: Arc<SuitabilityModel>,
    cache: FeatureCache,
    targets: Vec<String>,
    fetchers: Vec<Arc<dyn EnvironmentalFetcher>>,
    executor: Executor,
    top_n: usize,
}

impl OrchestratorBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn EnvironmentalFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn top_n(mut self, n: usize) -> Self {
        self.top_n = n.max(1);
        self
    }

    pub fn build(mut self) -> Orchestrator {
        self.fetchers.sort_by_key(|f| f.source());
        Orchestrator {
            inner: Arc::new(Inner {
                probe: self.probe,
                targets: self.targets,
                fetchers: self.fetchers,
                executor: self.executor,
                aggregator: Aggregator::new(self.cache),
                model: self.model,
                top_n: self.top_n,
                requests: SingleFlight::new("request"),
                fetches: SingleFlight::new("fetch"),
            }),
        }
    }
}

impl Orchestrator {
    pub fn builder(
        probe: Arc<dyn ConnectivityProbe>,
        model: Arc<SuitabilityModel>,
        cache: FeatureCache,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            probe,
            model,
            cache,
            targets: Vec::new(),
            fetchers: Vec::new(),
            executor: Executor::new(Default::default()),
            top_n: 3,
        }
    }

    /// Wire live providers, the network prober and the configured model.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let model = match &cfg.model.path {
            Some(p) => SuitabilityModel::from_path(p)
                .with_context(|| format!("loading model from {}", p.display()))?,
            None => SuitabilityModel::embedded().context("loading embedded model")?,
        };
        let probe = NetworkProber::new(cfg.connectivity.timeout()).context("building prober")?;
        let cache = FeatureCache::new(cfg.cache.ttl()?, cfg.cache.degraded_ttl()?);

        let s = &cfg.sources;
        Ok(Self::builder(Arc::new(probe), Arc::new(model), cache)
            .targets(cfg.connectivity.targets.clone())
            .executor(Executor::new(cfg.retry.policy()))
            .top_n(cfg.model.top_n)
            .fetcher(Arc::new(ClimateFetcher::new(s.climate.clone()).context("climate client")?))
            .fetcher(Arc::new(
                VegetationFetcher::new(s.vegetation.clone()).context("vegetation client")?,
            ))
            .fetcher(Arc::new(SoilFetcher::new(s.soil.clone()).context("soil client")?))
            .build())
    }

    pub fn model(&self) -> &SuitabilityModel {
        &self.inner.model
    }

    pub fn cache(&self) -> &FeatureCache {
        self.inner.aggregator.cache()
    }

    pub fn probe(&self) -> &dyn ConnectivityProbe {
        &*self.inner.probe
    }

    pub fn targets(&self) -> &[String] {
        &self.inner.targets
    }

    /// Number of request flights currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.requests.len()
    }

    /// Number of coordinates with a fetch batch currently running.
    pub fn fetches_in_flight(&self) -> usize {
        self.inner.fetches.len()
    }

    /// Validate raw coordinates, then [`Orchestrator::recommend`].
    pub async fn recommend_at(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        cancel: &CancellationToken,
    ) -> FlightOutput {
        let coordinate = Coordinate::new(latitude, longitude).map_err(|e| {
            RequestFailure::new(FailureCause::InvalidLocation(e.to_string()), vec![Stage::Idle])
        })?;
        self.recommend(user_id, coordinate, cancel).await
    }

    pub async fn recommend(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        cancel: &CancellationToken,
    ) -> FlightOutput {
        let key: FlightKey = (user_id.to_string(), coordinate.key());
        let user = anon_hash(user_id);
        let joined = self.inner.requests.join(key, |flight| {
            Arc::clone(&self.inner)
                .run(user.clone(), coordinate, flight)
                .boxed()
        });
        if joined.is_shared() {
            info!(
                target: "advisor::orchestrator",
                user = %user,
                key = %coordinate.key(),
                "joined running flight"
            );
        }

        match joined.wait(cancel).await {
            Ok(out) => out,
            Err(FlightError::Detached) => {
                info!(target: "advisor::orchestrator", user = %user, "waiter detached");
                Err(RequestFailure::new(FailureCause::Cancelled, vec![Stage::Idle]))
            }
            Err(FlightError::Aborted) => {
                Err(RequestFailure::new(FailureCause::Internal, vec![Stage::Idle]))
            }
        }
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        user: String,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> FlightOutput {
        let key = coordinate.key();
        let started = tokio::time::Instant::now();
        let out = self.pipeline(coordinate, &cancel).await;

        let elapsed = started.elapsed().as_secs_f64();
        histogram!("advisor_request_seconds").record(elapsed);
        match &out {
            Ok(r) => {
                counter!("advisor_requests_total", "outcome" => "done").increment(1);
                info!(
                    target: "advisor::orchestrator",
                    user = %user,
                    key = %key,
                    from_cache = r.from_cache,
                    degraded = ?r.degraded_sources,
                    top = r.candidates.first().map(|c| c.crop_id.as_str()).unwrap_or("-"),
                    elapsed_s = elapsed,
                    "recommendation done"
                );
            }
            Err(f) => {
                counter!(
                    "advisor_requests_total",
                    "outcome" => f.cause.metric_label()
                )
                .increment(1);
                warn!(
                    target: "advisor::orchestrator",
                    user = %user,
                    key = %key,
                    stage = ?f.stage,
                    cause = %f.cause,
                    elapsed_s = elapsed,
                    "recommendation failed"
                );
            }
        }
        out
    }

    async fn pipeline(
        self: &Arc<Self>,
        coordinate: Coordinate,
        cancel: &CancellationToken,
    ) -> FlightOutput {
        let mut stages = vec![Stage::Idle];
        let key = coordinate.key();

        let resolved = match self.aggregator.lookup(&key) {
            Some(hit) => {
                stages.push(Stage::Aggregating);
                hit
            }
            None => {
                let joined = self.fetches.join(key, |batch| {
                    Arc::clone(self).fetch_phase(coordinate, batch).boxed()
                });
                match joined.wait(cancel).await {
                    Ok(Ok(fresh)) => {
                        stages.extend([
                            Stage::ConnectivityChecked,
                            Stage::Fetching,
                            Stage::Aggregating,
                        ]);
                        fresh
                    }
                    Ok(Err(failed)) => {
                        stages.extend(failed.reached);
                        return Err(RequestFailure::new(failed.cause, stages));
                    }
                    Err(FlightError::Detached) => {
                        return Err(RequestFailure::new(FailureCause::Cancelled, stages));
                    }
                    Err(FlightError::Aborted) => {
                        return Err(RequestFailure::new(FailureCause::Internal, stages));
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return Err(RequestFailure::new(FailureCause::Cancelled, stages));
        }

        stages.push(Stage::Scoring);
        let mut candidates = match self.model.score_all(&resolved.vector) {
            Ok(c) => c,
            Err(ModelError::SchemaMismatch(m)) | Err(ModelError::Invalid(m)) => {
                return Err(RequestFailure::new(FailureCause::SchemaMismatch(m), stages));
            }
        };
        candidates.truncate(self.top_n);
        stages.push(Stage::Done);

        Ok(RecommendationResult {
            coordinate,
            candidates,
            features: resolved.vector,
            degraded_sources: resolved.degraded_sources,
            from_cache: resolved.from_cache,
            data_fetched_at: resolved.fetched_at,
            model_id: self.model.model_id().to_string(),
            generated_at: Utc::now(),
            stages,
        })
    }

    /// Shared per rounded coordinate: probe, fetch, merge and cache.
    async fn fetch_phase(
        self: Arc<Self>,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> FetchOutput {
        let mut reached = Vec::new();
        match self.fetch_all(coordinate, &cancel, &mut reached).await {
            Ok(fetched) => Ok(self.aggregator.store(coordinate.key(), fetched)),
            Err(cause) => Err(FetchFailure { cause, reached }),
        }
    }

    /// Connectivity gate plus one concurrent fetch batch. Runs only on cache miss.
    async fn fetch_all(
        &self,
        coordinate: Coordinate,
        cancel: &CancellationToken,
        stages: &mut Vec<Stage>,
    ) -> Result<Fetched, FailureCause> {
        if cancel.is_cancelled() {
            return Err(FailureCause::Cancelled);
        }
        let report = check_connectivity(&*self.probe, &self.targets).await;
        if !report.ok {
            return Err(FailureCause::NetworkUnreachable);
        }
        stages.push(Stage::ConnectivityChecked);
        stages.push(Stage::Fetching);

        let batch = cancel.child_token();
        let runs = self.fetchers.iter().map(|fetcher| {
            let batch = batch.clone();
            async move {
                let source = fetcher.source();
                let ctx = AttemptContext::new(source.as_str()).at(coordinate);
                let res = self
                    .executor
                    .execute(ctx, &batch, || fetcher.fetch(coordinate))
                    .await;
                if res.is_err() && source.is_mandatory() {
                    batch.cancel();
                }
                (source, res)
            }
        });
        let results = join_all(runs).await;

        if cancel.is_cancelled() {
            return Err(FailureCause::Cancelled);
        }

        let mut fetched = Fetched::default();
        for (source, res) in results {
            match res {
                Ok(partial) => fetched.results.push(partial),
                Err(e) if source.is_mandatory() => return Err(mandatory_cause(&e)),
                Err(e) => {
                    warn!(
                        target: "advisor::orchestrator",
                        source = source.as_str(),
                        error = %e,
                        "optional source unavailable, degrading"
                    );
                    counter!("advisor_degraded_sources_total", "source" => source.as_str())
                        .increment(1);
                    fetched.degraded_sources.push(source);
                }
            }
        }
        stages.push(Stage::Aggregating);
        Ok(fetched)
    }
}

fn mandatory_cause(e: &RetryError) -> FailureCause {
    match e {
        RetryError::Exhausted { attempts, .. } => FailureCause::MandatorySourceExhausted {
            attempts: *attempts,
        },
        RetryError::Fatal { cause, .. } => FailureCause::MandatorySourceRejected(cause.class),
        RetryError::Cancelled { .. } => FailureCause::Cancelled,
    }
}

/// Short, stable hash of a user id for logs.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::ConnectivityChecked => "connectivity_checked",
            Stage::Fetching => "fetching",
            Stage::Aggregating => "aggregating",
            Stage::Scoring => "scoring",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}
