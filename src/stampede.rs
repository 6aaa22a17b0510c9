//! Two layers of coalescing for a cold key: a local singleflight (one loader
//! call per process) and a best-effort distributed lock (one loader call per
//! cluster, opportunistically).
//!
//! The local layer's correctness hinges on the check-and-install for a key
//! being atomic: `DashMap::entry` takes a per-shard lock for the duration of
//! the closure, which is this crate's atomic insert-if-absent primitive on a
//! multi-threaded runtime.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{CacheError, CacheResult};
use crate::traits::Driver;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

const LOCK_GRACE_WINDOW: Duration = Duration::from_millis(100);

type FlightOutcome = Result<Vec<u8>, Arc<CacheError>>;

struct FlightState {
    tx: broadcast::Sender<FlightOutcome>,
    // A joiner arriving during the post-completion grace window subscribes
    // *after* the leader already sent — broadcast never replays to a new
    // subscriber, so the settled outcome is cached here too.
    outcome: OnceLock<FlightOutcome>,
    waiter_count: AtomicUsize,
    started_at: Instant,
}

pub struct ProtectResult {
    pub value: Vec<u8>,
    pub cached: bool,
    pub waited: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StampedeStats {
    pub active_flights: usize,
    pub total_waiters: usize,
    pub oldest_flight_ms: Option<u64>,
    pub prevented: u64,
}

pub struct Stampede {
    driver: Arc<dyn Driver>,
    flights: Arc<DashMap<String, Arc<FlightState>>>,
    lock_timeout: Duration,
    wait_timeout: Duration,
    prevented: AtomicU64,
    release_sha: Mutex<Option<String>>,
}

impl Stampede {
    pub fn new(driver: Arc<dyn Driver>, lock_timeout: Duration, wait_timeout: Duration) -> Self {
        Self {
            driver,
            flights: Arc::new(DashMap::new()),
            lock_timeout,
            wait_timeout,
            prevented: AtomicU64::new(0),
            release_sha: Mutex::new(None),
        }
    }

    /// Coalesces concurrent calls for `key`. The first caller to arrive
    /// becomes the leader and runs `loader`; everyone else becomes a waiter
    /// and observes the leader's outcome.
    pub async fn protect<F, Fut>(&self, key: &str, loader: F) -> CacheResult<ProtectResult>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = CacheResult<Vec<u8>>> + Send,
    {
        let (flight, is_leader) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let (tx, _rx) = broadcast::channel(1);
                let state = Arc::new(FlightState {
                    tx,
                    outcome: OnceLock::new(),
                    waiter_count: AtomicUsize::new(0),
                    started_at: Instant::now(),
                });
                v.insert(state.clone());
                (state, true)
            }
        };

        if !is_leader {
            return self.wait_for(key, &flight).await;
        }

        let lock_key = format!("_stampede:{key}");
        let nonce = uuid::Uuid::new_v4().to_string();
        let lock_ttl_secs = self.lock_timeout.as_secs().max(1);
        // Failure to acquire (contention or a Redis partition) does not abort
        // the loader: within this process we are still the unique leader.
        let lock_acquired = self
            .driver
            .set_nx_ex(&lock_key, &nonce, lock_ttl_secs)
            .await
            .unwrap_or(false);

        let outcome: FlightOutcome = match tokio::time::timeout(self.lock_timeout, loader()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Arc::new(e)),
            Err(_elapsed) => Err(Arc::new(CacheError::StampedeTimeout {
                key: key.to_string(),
                elapsed_ms: self.lock_timeout.as_millis() as u64,
            })),
        };

        // Cache the outcome before sending: a caller that arrives during the
        // grace window subscribes after this send and would otherwise wait
        // on a broadcast that never replays to it.
        let _ = flight.outcome.set(outcome.clone());
        let _ = flight.tx.send(outcome.clone());

        if lock_acquired {
            self.release_lock(&lock_key, &nonce).await;
        }

        self.schedule_flight_cleanup(key.to_string(), flight);

        match outcome {
            Ok(value) => Ok(ProtectResult {
                value,
                cached: false,
                waited: false,
            }),
            Err(e) => Err((*e).clone()),
        }
    }

    async fn wait_for(&self, key: &str, flight: &Arc<FlightState>) -> CacheResult<ProtectResult> {
        self.prevented.fetch_add(1, Ordering::Relaxed);

        // Late joiner: the flight already settled before we got here.
        if let Some(outcome) = flight.outcome.get() {
            return Self::settle(outcome.clone(), true);
        }

        flight.waiter_count.fetch_add(1, Ordering::Relaxed);
        let mut rx = flight.tx.subscribe();

        // The leader may have settled between our first check and the
        // subscribe call above; check once more before committing to a wait.
        if let Some(outcome) = flight.outcome.get() {
            flight.waiter_count.fetch_sub(1, Ordering::Relaxed);
            return Self::settle(outcome.clone(), true);
        }

        let waited = tokio::time::timeout(self.wait_timeout, rx.recv()).await;
        flight.waiter_count.fetch_sub(1, Ordering::Relaxed);

        match waited {
            Ok(Ok(outcome)) => Self::settle(outcome, true),
            Ok(Err(_recv_closed)) => Err(CacheError::operation(
                "stampede flight closed without a result",
            )),
            Err(_timeout) => Err(CacheError::StampedeTimeout {
                key: key.to_string(),
                elapsed_ms: self.wait_timeout.as_millis() as u64,
            }),
        }
    }

    fn settle(outcome: FlightOutcome, waited: bool) -> CacheResult<ProtectResult> {
        match outcome {
            Ok(value) => Ok(ProtectResult {
                value,
                cached: true,
                waited,
            }),
            Err(e) => Err((*e).clone()),
        }
    }

    /// Removes the flight 100ms after completion, but only if it is still
    /// the same flight — a `clearKey`/new leader race must not clobber a
    /// fresher entry.
    fn schedule_flight_cleanup(&self, key: String, flight: Arc<FlightState>) {
        let flights = self.flights.clone();
        tokio::spawn(async move {
            tokio::time::sleep(LOCK_GRACE_WINDOW).await;
            let same = flights
                .get(&key)
                .map(|entry| Arc::ptr_eq(entry.value(), &flight))
                .unwrap_or(false);
            if same {
                flights.remove(&key);
            }
        });
    }

    async fn release_sha(&self) -> Option<String> {
        if let Some(sha) = self.release_sha.lock().clone() {
            return Some(sha);
        }
        match self.driver.script_load(RELEASE_LOCK_SCRIPT).await {
            Ok(sha) => {
                *self.release_sha.lock() = Some(sha.clone());
                Some(sha)
            }
            Err(_) => None,
        }
    }

    async fn release_lock(&self, lock_key: &str, nonce: &str) {
        let keys = vec![lock_key.to_string()];
        let args = vec![nonce.to_string()];

        let via_sha = match self.release_sha().await {
            Some(sha) => self.driver.eval_sha(&sha, &keys, &args).await,
            None => Err(CacheError::operation("no cached lock-release script sha")),
        };
        let result = match via_sha {
            Ok(v) => Ok(v),
            Err(_) => self.driver.eval(RELEASE_LOCK_SCRIPT, &keys, &args).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, lock_key, "stampede lock release failed; ttl bounds the damage");
        }
    }

    /// Rejects the in-flight record for `key` with a cancellation error.
    pub fn clear_key(&self, key: &str) {
        if let Some((_, flight)) = self.flights.remove(key) {
            let _ = flight
                .tx
                .send(Err(Arc::new(CacheError::operation("flight cancelled"))));
        }
    }

    pub fn clear_all(&self) {
        let keys: Vec<String> = self.flights.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.clear_key(&key);
        }
    }

    pub fn stats(&self) -> StampedeStats {
        let now = Instant::now();
        let mut total_waiters = 0usize;
        let mut oldest_ms: Option<u64> = None;
        for entry in self.flights.iter() {
            total_waiters += entry.waiter_count.load(Ordering::Relaxed);
            let age = now.duration_since(entry.started_at).as_millis() as u64;
            oldest_ms = Some(oldest_ms.map_or(age, |m| m.max(age)));
        }
        StampedeStats {
            active_flights: self.flights.len(),
            total_waiters,
            oldest_flight_ms: oldest_ms,
            prevented: self.prevented.load(Ordering::Relaxed),
        }
    }
}
