//! # Resilient request executor
//! Runs one provider call under a bounded exponential backoff schedule.
//!
//! Schedule with the default policy: attempt 1 immediately, then 5 s, 10 s,
//! 20 s, 40 s and 60 s for every later attempt, up to 10 attempts. Fatal
//! failures (`Auth`, `Validation`) stop the loop on the spot. Waiting happens
//! on `tokio::time`, so tests drive it with a paused clock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinate::Coordinate;
use crate::error::{FailureClass, FetchError, RetryError};

/// Stand-in deadline for delays too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay that precedes attempt `attempt` (1-based). Attempt 1 runs at once.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Earliest offset from the first call at which attempt `attempt` may start.
    pub fn cumulative_delay(&self, attempt: u32) -> Duration {
        (1..=attempt).map(|k| self.delay_before(k)).sum()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Retry loop state. Terminal states are reported to the observer once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending { attempt: u32 },
    Waiting { attempt: u32, until: Instant },
    Retrying { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempts: u32, class: FailureClass },
    Cancelled { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. }
                | RetryState::Exhausted { .. }
                | RetryState::Aborted { .. }
                | RetryState::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "class")]
pub enum AttemptOutcome {
    Success,
    Failure(FailureClass),
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure(c) => c.as_str(),
        }
    }
}

/// Diagnostics for one attempt. Holds no provider text and no credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub source: &'static str,
    pub coordinate: Option<Coordinate>,
    pub attempt: u32,
    /// Backoff that preceded this attempt.
    pub delay: Duration,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    /// Monotonic start of the attempt (virtual under a paused clock).
    pub started_at: Instant,
    pub timestamp: DateTime<Utc>,
}

/// Sink for attempt diagnostics.
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);

    fn on_transition(&self, _source: &'static str, _state: &RetryState) {}
}

/// Default observer: one structured log line and two metrics per attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AttemptObserver for TracingObserver {
    fn on_attempt(&self, r: &AttemptRecord) {
        counter!(
            "advisor_fetch_attempts_total",
            "source" => r.source,
            "outcome" => r.outcome.as_str()
        )
        .increment(1);
        histogram!("advisor_fetch_attempt_latency_seconds", "source" => r.source)
            .record(r.latency.as_secs_f64());

        match r.outcome {
            AttemptOutcome::Success => info!(
                target: "advisor::retry",
                source = r.source,
                attempt = r.attempt,
                delay_ms = r.delay.as_millis() as u64,
                latency_ms = r.latency.as_millis() as u64,
                "fetch attempt succeeded"
            ),
            AttemptOutcome::Failure(class) => warn!(
                target: "advisor::retry",
                source = r.source,
                attempt = r.attempt,
                class = class.as_str(),
                delay_ms = r.delay.as_millis() as u64,
                latency_ms = r.latency.as_millis() as u64,
                "fetch attempt failed"
            ),
        }
    }

    fn on_transition(&self, source: &'static str, state: &RetryState) {
        debug!(target: "advisor::retry", source, ?state, "retry state");
    }
}

/// What the executor knows about the call it is running.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    pub source: &'static str,
    pub coordinate: Option<Coordinate>,
}

impl AttemptContext {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            coordinate: None,
        }
    }

    pub fn at(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = Some(coordinate);
        self
    }
}

#[derive(Clone)]
pub struct Executor {
    policy: RetryPolicy,
    observer: Arc<dyn AttemptObserver>,
}

impl Executor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts, or
    /// `cancel` fires. Cancellation is checked before each attempt and raced
    /// against each wait; an attempt already in flight is never interrupted.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: AttemptContext,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max = self.policy.attempts();
        let mut state = RetryState::Pending { attempt: 1 };
        self.observer.on_transition(ctx.source, &state);

        loop {
            match state {
                RetryState::Pending { attempt } | RetryState::Retrying { attempt } => {
                    if cancel.is_cancelled() {
                        return Err(self.finish_cancelled(ctx, attempt - 1));
                    }

                    let started_at = Instant::now();
                    let result = op().await;
                    let outcome = match &result {
                        Ok(_) => AttemptOutcome::Success,
                        Err(e) => AttemptOutcome::Failure(e.class),
                    };
                    self.observer.on_attempt(&AttemptRecord {
                        source: ctx.source,
                        coordinate: ctx.coordinate,
                        attempt,
                        delay: self.policy.delay_before(attempt),
                        outcome,
                        latency: started_at.elapsed(),
                        started_at,
                        timestamp: Utc::now(),
                    });

                    match result {
                        Ok(value) => {
                            self.transition(ctx, RetryState::Succeeded { attempts: attempt });
                            return Ok(value);
                        }
                        Err(cause) if cause.class.is_fatal() => {
                            self.transition(
                                ctx,
                                RetryState::Aborted {
                                    attempts: attempt,
                                    class: cause.class,
                                },
                            );
                            return Err(RetryError::Fatal {
                                source_name: ctx.source,
                                attempts: attempt,
                                cause,
                            });
                        }
                        Err(last) if attempt >= max => {
                            self.transition(ctx, RetryState::Exhausted { attempts: attempt });
                            return Err(RetryError::Exhausted {
                                source_name: ctx.source,
                                attempts: attempt,
                                last,
                            });
                        }
                        Err(_) => {
                            let next = attempt + 1;
                            let now = Instant::now();
                            state = RetryState::Waiting {
                                attempt: next,
                                until: now
                                    .checked_add(self.policy.delay_before(next))
                                    .unwrap_or_else(|| now + FAR_FUTURE),
                            };
                            self.observer.on_transition(ctx.source, &state);
                        }
                    }
                }
                RetryState::Waiting { attempt, until } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(self.finish_cancelled(ctx, attempt - 1));
                        }
                        _ = tokio::time::sleep_until(until) => {
                            state = RetryState::Retrying { attempt };
                            self.observer.on_transition(ctx.source, &state);
                        }
                    }
                }
                RetryState::Succeeded { .. }
                | RetryState::Exhausted { .. }
                | RetryState::Aborted { .. }
                | RetryState::Cancelled { .. } => {
                    unreachable!("terminal states are returned, never stored")
                }
            }
        }
    }

    fn transition(&self, ctx: AttemptContext, state: RetryState) {
        self.observer.on_transition(ctx.source, &state);
    }

    fn finish_cancelled(&self, ctx: AttemptContext, attempts: u32) -> RetryError {
        self.transition(ctx, RetryState::Cancelled { attempts });
        debug!(target: "advisor::retry", source = ctx.source, attempts, "retry loop cancelled");
        RetryError::Cancelled {
            source_name: ctx.source,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_matches_documented_delays() {
        let p = RetryPolicy::default();
        let secs: Vec<u64> = (1..=10).map(|k| p.delay_before(k).as_secs()).collect();
        assert_eq!(secs, vec![0, 5, 10, 20, 40, 60, 60, 60, 60, 60]);
        assert_eq!(p.cumulative_delay(10).as_secs(), 375);
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(64), Duration::from_secs(60));
        assert_eq!(p.delay_before(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn terminal_states() {
        assert!(RetryState::Succeeded { attempts: 1 }.is_terminal());
        assert!(!RetryState::Retrying { attempt: 2 }.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_attempts_still_runs_once() {
        let exec = Executor::new(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        let err = exec
            .execute(AttemptContext::new("test"), &CancellationToken::new(), || async {
                Err::<(), _>(FetchError::transient("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_delay_waits_instead_of_overflowing() {
        let exec = Executor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::MAX,
            max_delay: Duration::MAX,
        });
        let cancel = CancellationToken::new();
        let stop = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };
        let (res, ()) = tokio::join!(
            exec.execute(AttemptContext::new("test"), &cancel, || async {
                Err::<(), _>(FetchError::transient("boom"))
            }),
            stop,
        );
        assert!(matches!(res, Err(RetryError::Cancelled { attempts: 1, .. })), "{res:?}");
    }
}
