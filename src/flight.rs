//! # Single-flight table
//!
//! Callers that ask for the same key while a task for it is running share
//! that task's result instead of starting their own. The task is spawned, so
//! it keeps running when one caller stops waiting; it is cancelled through
//! its [`CancellationToken`] once the last caller has left.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlightError {
    #[error("caller stopped waiting")]
    Detached,
    #[error("flight task aborted")]
    Aborted,
}

type FlightFuture<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;

struct Slot<T> {
    id: u64,
    future: FlightFuture<T>,
    cancel: CancellationToken,
    waiters: usize,
}

type Slots<K, T> = Arc<Mutex<HashMap<K, Slot<T>>>>;

fn lock<K, T>(slots: &Mutex<HashMap<K, Slot<T>>>) -> MutexGuard<'_, HashMap<K, Slot<T>>> {
    slots.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct SingleFlight<K, T> {
    name: &'static str,
    slots: Slots<K, T>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// `name` labels the join counter and log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of keys with a running task.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach to the running task for `key`, or spawn `start` as a new one.
    /// `start` receives the token that fires when every caller has left.
    pub fn join<F>(&self, key: K, start: F) -> Joined<K, T>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, T>,
    {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get_mut(&key) {
            slot.waiters += 1;
            counter!("advisor_single_flight_joins_total", "flight" => self.name).increment(1);
            debug!(
                target: "advisor::flight",
                flight = self.name,
                key = ?key,
                waiters = slot.waiters,
                "joined running flight"
            );
            return Joined {
                future: slot.future.clone(),
                shared: true,
                guard: Detach {
                    slots: Arc::clone(&self.slots),
                    key,
                    id: slot.id,
                    name: self.name,
                    armed: true,
                },
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let work = start(cancel.clone());

        let done = (Arc::clone(&self.slots), key.clone());
        let task = tokio::spawn(async move {
            let out = work.await;
            let (slots, key) = done;
            let mut slots = lock(&slots);
            if slots.get(&key).is_some_and(|s| s.id == id) {
                slots.remove(&key);
            }
            out
        });

        let name = self.name;
        let future = async move {
            task.await.map_err(|e| {
                warn!(target: "advisor::flight", flight = name, error = %e, "flight task aborted");
                FlightError::Aborted
            })
        }
        .boxed()
        .shared();

        slots.insert(
            key.clone(),
            Slot {
                id,
                future: future.clone(),
                cancel,
                waiters: 1,
            },
        );
        Joined {
            future,
            shared: false,
            guard: Detach {
                slots: Arc::clone(&self.slots),
                key,
                id,
                name: self.name,
                armed: true,
            },
        }
    }
}

/// A caller's handle on a flight. Dropping it without waiting detaches.
pub struct Joined<K: Eq + Hash + fmt::Debug, T> {
    future: FlightFuture<T>,
    shared: bool,
    guard: Detach<K, T>,
}

impl<K: Eq + Hash + fmt::Debug, T: Clone> Joined<K, T> {
    /// True when the caller attached to a task someone else started.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Result of the flight, or `Detached` if `cancel` fires first.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<T, FlightError> {
        let Joined {
            future, mut guard, ..
        } = self;
        tokio::select! {
            biased;
            out = future => {
                guard.armed = false;
                out
            }
            _ = cancel.cancelled() => Err(FlightError::Detached),
        }
    }
}

struct Detach<K: Eq + Hash + fmt::Debug, T> {
    slots: Slots<K, T>,
    key: K,
    id: u64,
    name: &'static str,
    armed: bool,
}

impl<K: Eq + Hash + fmt::Debug, T> Drop for Detach<K, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&self.key) else {
            return;
        };
        if slot.id != self.id {
            return;
        }
        slot.waiters = slot.waiters.saturating_sub(1);
        if slot.waiters == 0 {
            slot.cancel.cancel();
            slots.remove(&self.key);
            info!(
                target: "advisor::flight",
                flight = self.name,
                key = ?self.key,
                "last waiter left, flight cancelled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn counted(runs: &Arc<AtomicU32>, secs: u64) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, u32> {
        let runs = Arc::clone(runs);
        move |cancel| {
            async move {
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::select! {
                    _ = cancel.cancelled() => 0,
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => n,
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_shares_one_task() {
        let table: SingleFlight<&'static str, u32> = SingleFlight::new("test");
        let runs = Arc::new(AtomicU32::new(0));

        let a = table.join("k", counted(&runs, 2));
        let b = table.join("k", counted(&runs, 2));
        assert!(!a.is_shared());
        assert!(b.is_shared());
        assert_eq!(table.len(), 1);

        let (never_a, never_b) = (CancellationToken::new(), CancellationToken::new());
        let (ra, rb) = tokio::join!(a.wait(&never_a), b.wait(&never_b));
        assert_eq!(ra, Ok(1));
        assert_eq!(rb, Ok(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn other_keys_run_separately() {
        let table: SingleFlight<u8, u32> = SingleFlight::new("test");
        let runs = Arc::new(AtomicU32::new(0));

        let a = table.join(1, counted(&runs, 1));
        let b = table.join(2, counted(&runs, 1));
        assert!(!b.is_shared());
        let never = CancellationToken::new();
        let (ra, rb) = tokio::join!(a.wait(&never), b.wait(&never));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_caller_leaving_cancels_the_task() {
        let table: SingleFlight<u8, u32> = SingleFlight::new("test");
        let runs = Arc::new(AtomicU32::new(0));
        let flight_token = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&flight_token);
        let joined = table.join(7, move |cancel| {
            *seen.lock().unwrap() = Some(cancel.clone());
            counted(&runs, 60)(cancel)
        });

        let leave = CancellationToken::new();
        leave.cancel();
        assert_eq!(joined.wait(&leave).await, Err(FlightError::Detached));
        assert!(table.is_empty());
        let token = flight_token.lock().unwrap().clone().expect("start ran");
        assert!(token.is_cancelled());
    }
}
