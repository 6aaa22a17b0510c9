//! Background revalidation scheduler: at most one in-flight refresh per key.
//! `jobs` is a liveness marker set — presence means "a revalidation for this
//! key is already running" — checked and installed atomically via
//! `DashMap::entry`, the same primitive the stampede flights map uses.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub struct SwrScheduler {
    jobs: Arc<DashMap<String, ()>>,
}

impl Default for SwrScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SwrScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
        }
    }

    pub fn should_revalidate(&self, key: &str) -> bool {
        !self.jobs.contains_key(key)
    }

    /// Refuses to enqueue a duplicate revalidation for `key`. Runs `loader`
    /// on a separate task so the foreground caller returns immediately with
    /// the stale value; `on_success`/`on_error` run once the loader settles,
    /// and the job marker is removed regardless of outcome.
    pub fn schedule_revalidation<L, LFut, S, SFut, E>(
        &self,
        key: String,
        loader: L,
        on_success: S,
        on_error: E,
    ) where
        L: FnOnce() -> LFut + Send + 'static,
        LFut: Future<Output = Result<Vec<u8>, anyhow::Error>> + Send + 'static,
        S: FnOnce(Vec<u8>) -> SFut + Send + 'static,
        SFut: Future<Output = ()> + Send + 'static,
        E: FnOnce(anyhow::Error) + Send + 'static,
    {
        let inserted = matches!(self.jobs.entry(key.clone()), Entry::Vacant(v) if { v.insert(()); true });
        if !inserted {
            return;
        }

        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            match loader().await {
                Ok(bytes) => on_success(bytes).await,
                Err(e) => on_error(e),
            }
            jobs.remove(&key);
        });
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }
}
