// tests/retry_schedule.rs
//
// Retry executor behaviour under a paused tokio clock.
//
// Covered:
// - backoff schedule 0, 5, 10, 20, 40, 60, 60... and total span of 10 attempts
// - success on a later attempt stops the loop
// - Auth / Validation abort after the first attempt
// - cancellation during a backoff wait
// - a pre-cancelled token never runs the operation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crop_advisor::error::{FailureClass, FetchError, RetryError};
use crop_advisor::retry::{
    AttemptContext, AttemptObserver, AttemptOutcome, AttemptRecord, Executor, RetryPolicy,
    RetryState,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Collect {
    records: Mutex<Vec<AttemptRecord>>,
    states: Mutex<Vec<RetryState>>,
}

impl Collect {
    fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().unwrap().clone()
    }

    fn last_state(&self) -> Option<RetryState> {
        self.states.lock().unwrap().last().copied()
    }
}

impl AttemptObserver for Collect {
    fn on_attempt(&self, record: &AttemptRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn on_transition(&self, _source: &'static str, state: &RetryState) {
        self.states.lock().unwrap().push(*state);
    }
}

fn executor() -> (Executor, Arc<Collect>) {
    let obs = Arc::new(Collect::default());
    let exec = Executor::new(RetryPolicy::default()).with_observer(obs.clone());
    (exec, obs)
}

/// Offsets (seconds) of every attempt relative to the first one.
fn offsets(records: &[AttemptRecord]) -> Vec<u64> {
    let first = records[0].started_at;
    records
        .iter()
        .map(|r| (r.started_at - first).as_secs())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn transient_failures_follow_the_backoff_schedule_until_exhausted() {
    let (exec, obs) = executor();
    let calls = AtomicU32::new(0);

    let res: Result<(), RetryError> = exec
        .execute(AttemptContext::new("climate"), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::transient("HTTP 503")) }
        })
        .await;

    match res {
        Err(RetryError::Exhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 10);
            assert_eq!(last.class, FailureClass::Transient);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    let records = obs.records();
    let delays: Vec<u64> = records.iter().map(|r| r.delay.as_secs()).collect();
    assert_eq!(delays, vec![0, 5, 10, 20, 40, 60, 60, 60, 60, 60]);
    assert_eq!(
        offsets(&records),
        vec![0, 5, 15, 35, 75, 135, 195, 255, 315, 375]
    );
    assert!(records
        .iter()
        .all(|r| r.outcome == AttemptOutcome::Failure(FailureClass::Transient)));
    assert_eq!(obs.last_state(), Some(RetryState::Exhausted { attempts: 10 }));
}

#[tokio::test(start_paused = true)]
async fn success_on_third_attempt_stops_the_loop() {
    let (exec, obs) = executor();
    let calls = AtomicU32::new(0);

    let res = exec
        .execute(AttemptContext::new("vegetation"), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(FetchError::transient("timeout"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(res, Ok(3));
    let records = obs.records();
    assert_eq!(records.len(), 3);
    assert_eq!(offsets(&records), vec![0, 5, 15]);
    assert_eq!(records[2].outcome, AttemptOutcome::Success);
    assert_eq!(obs.last_state(), Some(RetryState::Succeeded { attempts: 3 }));
}

#[tokio::test(start_paused = true)]
async fn fatal_classes_abort_without_retrying() {
    for (err, class) in [
        (FetchError::auth("HTTP 401"), FailureClass::Auth),
        (FetchError::validation("HTTP 422"), FailureClass::Validation),
    ] {
        let (exec, obs) = executor();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let res: Result<(), _> = exec
            .execute(AttemptContext::new("soil"), &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err(err) }
            })
            .await;

        let e = res.expect_err("fatal failure must surface");
        assert!(matches!(e, RetryError::Fatal { attempts: 1, .. }), "{e:?}");
        assert_eq!(e.class(), Some(class));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO, "no backoff after a fatal error");
        assert_eq!(
            obs.last_state(),
            Some(RetryState::Aborted { attempts: 1, class })
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_wait_ends_the_loop() {
    let (exec, obs) = executor();
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let run = exec.execute(AttemptContext::new("climate"), &cancel, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(FetchError::transient("connection reset")) }
    });
    let canceller = async {
        // Attempts run at 0 s and 5 s; the next one is due at 15 s.
        tokio::time::sleep(Duration::from_secs(7)).await;
        cancel.cancel();
    };

    let (res, ()) = tokio::join!(run, canceller);

    match res {
        Err(RetryError::Cancelled { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(obs.last_state(), Some(RetryState::Cancelled { attempts: 2 }));
}

#[tokio::test]
async fn pre_cancelled_token_never_calls_the_operation() {
    let (exec, obs) = executor();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let calls = AtomicU32::new(0);

    let res = exec
        .execute(AttemptContext::new("climate"), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), FetchError>(()) }
        })
        .await;

    assert_eq!(res.unwrap_err().attempts(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(obs.records().is_empty());
}
