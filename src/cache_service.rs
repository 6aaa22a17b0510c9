//! The facade composing every subsystem: key enrichment, the two storage
//! tiers, stampede protection, stale-while-revalidate, and tag invalidation.
//!
//! `get_or_set` is the one operation that touches all of them; the other
//! methods are thin compositions of `KeyCodec` + `L1Store`/`L2Store`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::broadcast::{AtomicBroadcastStats, BroadcastStats, InvalidationMessage, InvalidationPublisher};
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, StoredValue, SwrEntry, SwrState};
use crate::error::{CacheError, CacheResult};
use crate::key_codec::KeyCodec;
use crate::l1_store::{L1Backend, L1Stats};
use crate::l2_store::L2Store;
use crate::stampede::{Stampede, StampedeStats};
use crate::swr::SwrScheduler;
use crate::tag_index::TagIndex;
use crate::traits::{ContextValue, Serializer};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Which tiers a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStrategy {
    #[default]
    L1L2,
    L1Only,
    L2Only,
}

impl WriteStrategy {
    fn writes_l1(self) -> bool {
        !matches!(self, WriteStrategy::L2Only)
    }

    fn writes_l2(self) -> bool {
        !matches!(self, WriteStrategy::L1Only)
    }
}

/// Per-call key-enrichment overrides, shared by every operation.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub vary_by: Option<BTreeMap<String, ContextValue>>,
    pub skip_context: bool,
}

/// Options accepted by `set`.
#[derive(Default)]
pub struct SetOptions {
    pub key: KeyOptions,
    pub ttl_secs: Option<u64>,
    pub tags: Vec<String>,
    pub strategy: WriteStrategy,
    /// When `Some(stale_secs)`, the value is wrapped in an SWR envelope with
    /// this staleness window instead of a plain expiring entry.
    pub swr_stale_secs: Option<u64>,
}

/// Options accepted by `get_or_set`. `loader` produces a fresh value on miss.
pub struct GetOrSetOptions<T> {
    pub key: KeyOptions,
    pub ttl_secs: Option<u64>,
    pub tags: Vec<String>,
    pub strategy: WriteStrategy,
    pub swr_stale_secs: Option<u64>,
    /// Bypasses the cache entirely (neither read nor write) when `false`.
    pub condition: bool,
    /// Skips caching the loaded value (but still returns it) when this
    /// returns `true`.
    pub unless: Option<Box<dyn Fn(&T) -> bool + Send>>,
}

impl<T> Default for GetOrSetOptions<T> {
    fn default() -> Self {
        Self {
            key: KeyOptions::default(),
            ttl_secs: None,
            tags: Vec::new(),
            strategy: WriteStrategy::default(),
            swr_stale_secs: None,
            condition: true,
            unless: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheServiceStats {
    pub l1: Option<L1Stats>,
    pub stampede: StampedeStats,
    pub broadcast: Option<BroadcastStats>,
    pub active_swr_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub l1_ok: bool,
    pub l2_ok: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.l1_ok
    }
}

pub struct CacheService {
    config: CacheConfig,
    key_codec: KeyCodec,
    l1: Option<Arc<dyn L1Backend>>,
    l2: Option<L2Store>,
    serializer: Arc<dyn Serializer>,
    stampede: Option<Stampede>,
    swr: SwrScheduler,
    tag_index: Option<TagIndex>,
    broadcast_publisher: Option<tokio::sync::Mutex<InvalidationPublisher>>,
    broadcast_stats: Option<Arc<AtomicBroadcastStats>>,
}

impl CacheService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: CacheConfig,
        key_codec: KeyCodec,
        l1: Option<Arc<dyn L1Backend>>,
        l2: Option<L2Store>,
        serializer: Arc<dyn Serializer>,
        stampede: Option<Stampede>,
        tag_index: Option<TagIndex>,
        broadcast_publisher: Option<tokio::sync::Mutex<InvalidationPublisher>>,
        broadcast_stats: Option<Arc<AtomicBroadcastStats>>,
    ) -> Self {
        Self {
            config,
            key_codec,
            l1,
            l2,
            serializer,
            stampede,
            swr: SwrScheduler::new(),
            tag_index,
            broadcast_publisher,
            broadcast_stats,
        }
    }

    fn enrich(&self, raw_key: &str, opts: &KeyOptions) -> CacheResult<String> {
        self.key_codec.enrich(raw_key, opts.vary_by.as_ref(), opts.skip_context)
    }

    fn encode<T: Serialize>(&self, stored: &StoredValue<T>) -> CacheResult<Vec<u8>> {
        let value = serde_json::to_value(stored)
            .map_err(|e| CacheError::serialization(e.to_string()))?;
        self.serializer.encode(&value)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<StoredValue<T>> {
        let value = self.serializer.decode(bytes)?;
        serde_json::from_value(value).map_err(|e| CacheError::serialization(e.to_string()))
    }

    /// Reads a single key, checking L1 then L2. Returns `None` on a clean
    /// miss; fresh-but-stale SWR entries are returned with revalidation left
    /// to the caller (only `get_or_set` triggers background refresh).
    pub async fn get<T: DeserializeOwned>(&self, raw_key: &str, opts: &KeyOptions) -> CacheResult<Option<T>> {
        let key = match self.enrich(raw_key, opts) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, raw_key, "key validation failed, reporting miss");
                return Ok(None);
            }
        };
        match self.read_tiers::<T>(&key).await {
            Ok(Some((value, _state))) => Ok(Some(value)),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, key, "cache read failed, reporting miss");
                Ok(None)
            }
        }
    }

    async fn read_tiers<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<(T, SwrState)>> {
        if let Some(l1) = &self.l1 {
            if let Some(bytes) = l1.get(key).await {
                if let Some(hit) = self.stored_to_value(&bytes)? {
                    return Ok(Some(hit));
                }
            }
        }
        if let Some(l2) = &self.l2 {
            if let Some(bytes) = l2.get(key).await? {
                if let Some((value, state, remaining_ttl)) = self.stored_to_value_with_ttl(&bytes)? {
                    if let Some(l1) = &self.l1 {
                        let backfill_ttl = remaining_ttl.min(self.config.l1.ttl_secs).max(1);
                        l1.set(key, bytes, Some(backfill_ttl)).await;
                    }
                    return Ok(Some((value, state)));
                }
            }
        }
        Ok(None)
    }

    fn stored_to_value<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<Option<(T, SwrState)>> {
        self.stored_to_value_with_ttl(bytes).map(|r| r.map(|(v, s, _)| (v, s)))
    }

    fn stored_to_value_with_ttl<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<Option<(T, SwrState, u64)>> {
        let now = now_ms();
        let stored: StoredValue<T> = self.decode(bytes)?;
        match stored {
            StoredValue::Plain(entry) => {
                if entry.is_expired(now) {
                    Ok(None)
                } else {
                    let ttl = entry.remaining_ttl_secs(now);
                    Ok(Some((entry.value, SwrState::Fresh, ttl)))
                }
            }
            StoredValue::Swr(entry) => {
                let state = entry.state(now, self.config.swr.enabled);
                if state == SwrState::Expired {
                    Ok(None)
                } else {
                    let ttl = entry.remaining_ttl_secs(now);
                    Ok(Some((entry.value, state, ttl)))
                }
            }
        }
    }

    pub async fn set<T: Serialize>(&self, raw_key: &str, value: T, opts: &SetOptions) -> CacheResult<()> {
        let key = self.enrich(raw_key, &opts.key)?;
        let bytes = self.build_stored_bytes(value, opts)?;
        self.write_tiers(&key, bytes, opts).await
    }

    fn build_stored_bytes<T: Serialize>(&self, value: T, opts: &SetOptions) -> CacheResult<Vec<u8>> {
        let fresh_ttl = opts.ttl_secs.unwrap_or(self.config.l2.default_ttl_secs);
        self.validate_ttl(fresh_ttl)?;
        let stored = match opts.swr_stale_secs {
            Some(stale_secs) => StoredValue::Swr(SwrEntry::new(value, fresh_ttl, stale_secs, opts.tags.clone())),
            None => StoredValue::Plain(CacheEntry::new(value, fresh_ttl, opts.tags.clone())),
        };
        self.encode(&stored)
    }

    async fn write_tiers(&self, key: &str, bytes: Vec<u8>, opts: &SetOptions) -> CacheResult<()> {
        let ttl = self.tier_ttl(opts);
        if opts.strategy.writes_l1() {
            if let Some(l1) = &self.l1 {
                let l1_ttl = ttl.min(self.config.l1.ttl_secs).max(1);
                l1.set(key, bytes.clone(), Some(l1_ttl)).await;
            }
        }
        if opts.strategy.writes_l2() {
            if let Some(l2) = &self.l2 {
                l2.set(key, bytes, ttl).await?;
                if let Some(tag_index) = &self.tag_index {
                    if !opts.tags.is_empty() {
                        tag_index.add_key_to_tags(&l2.fq_key(key), &opts.tags).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_ttl(&self, ttl_secs: u64) -> CacheResult<()> {
        if ttl_secs == 0 {
            return Err(CacheError::validation("ttl_secs must be greater than zero"));
        }
        if ttl_secs > self.config.l2.max_ttl_secs {
            return Err(CacheError::validation(format!(
                "ttl_secs {ttl_secs} exceeds max_ttl_secs={}",
                self.config.l2.max_ttl_secs
            )));
        }
        Ok(())
    }

    fn tier_ttl(&self, opts: &SetOptions) -> u64 {
        let fresh_ttl = opts.ttl_secs.unwrap_or(self.config.l2.default_ttl_secs);
        match opts.swr_stale_secs {
            Some(stale) => (fresh_ttl + stale).min(self.config.l2.max_ttl_secs),
            None => fresh_ttl.min(self.config.l2.max_ttl_secs),
        }
    }

    pub async fn delete(&self, raw_key: &str, opts: &KeyOptions) -> CacheResult<bool> {
        let key = self.enrich(raw_key, opts)?;
        let mut deleted = false;
        if let Some(l1) = &self.l1 {
            deleted |= l1.delete(&key).await;
        }
        if let Some(l2) = &self.l2 {
            deleted |= l2.delete(&key).await?;
        }
        self.publish_invalidation(InvalidationMessage::remove(key)).await;
        Ok(deleted)
    }

    pub async fn has(&self, raw_key: &str, opts: &KeyOptions) -> CacheResult<bool> {
        let key = match self.enrich(raw_key, opts) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, raw_key, "key validation failed, reporting miss");
                return Ok(false);
            }
        };
        if let Some(l1) = &self.l1 {
            if l1.has(&key).await {
                return Ok(true);
            }
        }
        if let Some(l2) = &self.l2 {
            return l2.has(&key).await;
        }
        Ok(false)
    }

    /// `-2` missing, `-1` no expiry tracked at this layer, else seconds.
    pub async fn ttl(&self, raw_key: &str, opts: &KeyOptions) -> CacheResult<i64> {
        let key = match self.enrich(raw_key, opts) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, raw_key, "key validation failed, reporting missing");
                return Ok(-2);
            }
        };
        if let Some(l2) = &self.l2 {
            return l2.ttl(&key).await;
        }
        if let Some(l1) = &self.l1 {
            return Ok(if l1.has(&key).await { -1 } else { -2 });
        }
        Ok(-2)
    }

    /// Checks L1 per key (no batch API there), then pipelines the L1 misses
    /// through a single `L2Store::get_many` round trip. A key that fails
    /// enrichment degrades to a `None` slot rather than aborting the batch.
    pub async fn get_many<T: DeserializeOwned>(&self, raw_keys: &[String], opts: &KeyOptions) -> CacheResult<Vec<Option<T>>> {
        let mut keys: Vec<Option<String>> = Vec::with_capacity(raw_keys.len());
        for raw_key in raw_keys {
            match self.enrich(raw_key, opts) {
                Ok(key) => keys.push(Some(key)),
                Err(e) => {
                    warn!(error = %e, raw_key, "key validation failed, reporting miss");
                    keys.push(None);
                }
            }
        }

        let mut out: Vec<Option<T>> = (0..raw_keys.len()).map(|_| None).collect();
        let mut l2_misses: Vec<(usize, String)> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            let Some(key) = key else { continue };
            if let Some(l1) = &self.l1 {
                if let Some(bytes) = l1.get(key).await {
                    match self.stored_to_value::<T>(&bytes) {
                        Ok(Some((value, _state))) => {
                            out[i] = Some(value);
                            continue;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, key, "l1 decode failed during get_many, falling back to l2"),
                    }
                }
            }
            l2_misses.push((i, key.clone()));
        }

        if !l2_misses.is_empty() {
            if let Some(l2) = &self.l2 {
                let l2_keys: Vec<String> = l2_misses.iter().map(|(_, k)| k.clone()).collect();
                match l2.get_many(&l2_keys).await {
                    Ok(results) => {
                        for ((i, key), bytes) in l2_misses.into_iter().zip(results) {
                            let Some(bytes) = bytes else { continue };
                            match self.stored_to_value_with_ttl::<T>(&bytes) {
                                Ok(Some((value, _state, remaining_ttl))) => {
                                    if let Some(l1) = &self.l1 {
                                        let backfill_ttl = remaining_ttl.min(self.config.l1.ttl_secs).max(1);
                                        l1.set(&key, bytes, Some(backfill_ttl)).await;
                                    }
                                    out[i] = Some(value);
                                }
                                Ok(None) => {}
                                Err(e) => warn!(error = %e, key, "l2 decode failed during get_many, reporting miss"),
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "l2 batch get failed during get_many, reporting miss for remaining keys"),
                }
            }
        }

        Ok(out)
    }

    /// Builds every envelope up front (so a single bad TTL/key fails the
    /// whole call the same way the singular `set` would), then pipelines the
    /// L2 writes through `L2Store::set_many`.
    pub async fn set_many<T: Serialize>(&self, items: Vec<(String, T)>, opts: &SetOptions) -> CacheResult<()> {
        let ttl = self.tier_ttl(opts);
        let l1_ttl = ttl.min(self.config.l1.ttl_secs).max(1);

        let mut l2_items: Vec<(String, Vec<u8>, u64)> = Vec::with_capacity(items.len());
        for (raw_key, value) in items {
            let key = self.enrich(&raw_key, &opts.key)?;
            let bytes = self.build_stored_bytes(value, opts)?;
            if opts.strategy.writes_l1() {
                if let Some(l1) = &self.l1 {
                    l1.set(&key, bytes.clone(), Some(l1_ttl)).await;
                }
            }
            if opts.strategy.writes_l2() {
                l2_items.push((key, bytes, ttl));
            }
        }

        if opts.strategy.writes_l2() && !l2_items.is_empty() {
            if let Some(l2) = &self.l2 {
                l2.set_many(&l2_items).await?;
                if let Some(tag_index) = &self.tag_index {
                    if !opts.tags.is_empty() {
                        for (key, _, _) in &l2_items {
                            tag_index.add_key_to_tags(&l2.fq_key(key), &opts.tags).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Deletes per key from L1 (no batch API there) and pipelines the L2
    /// removal through `L2Store::delete_many`. A key counts toward the
    /// returned total if it existed in either tier, matching the singular
    /// `delete`'s OR-across-tiers semantics; `L2Store::get_many` is used as a
    /// pipelined existence check since `del_many` only reports an aggregate.
    pub async fn delete_many(&self, raw_keys: &[String], opts: &KeyOptions) -> CacheResult<u64> {
        let mut keys: Vec<String> = Vec::with_capacity(raw_keys.len());
        for raw_key in raw_keys {
            match self.enrich(raw_key, opts) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(error = %e, raw_key, "key validation failed, skipping in delete_many"),
            }
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let mut existed = vec![false; keys.len()];
        if let Some(l1) = &self.l1 {
            for (i, key) in keys.iter().enumerate() {
                if l1.delete(key).await {
                    existed[i] = true;
                }
            }
        }
        if let Some(l2) = &self.l2 {
            let before = l2.get_many(&keys).await?;
            for (i, bytes) in before.iter().enumerate() {
                if bytes.is_some() {
                    existed[i] = true;
                }
            }
            l2.delete_many(&keys).await?;
        }

        let deleted = existed.iter().filter(|&&e| e).count() as u64;
        if deleted > 0 {
            self.publish_invalidation(InvalidationMessage::remove_bulk(keys)).await;
        }
        Ok(deleted)
    }

    /// Cache-aside with stampede protection and optional stale-while-revalidate.
    ///
    /// Control flow: enrich key → honor `condition` (bypass entirely when
    /// false) → check L1/L2 → on a fresh hit return it; on a stale SWR hit
    /// return it and kick off at most one background refresh; on a miss or
    /// any cache-layer fault, fall back to `loader` directly, coalesced
    /// across concurrent callers by `Stampede`.
    pub async fn get_or_set<T, L, Fut>(
        &self,
        raw_key: &str,
        loader: L,
        opts: GetOrSetOptions<T>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        L: FnOnce() -> Fut + Send + Clone + 'static,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        if !opts.condition {
            return loader().await.map_err(|e| CacheError::loader(e.to_string()));
        }

        let key = self.enrich(raw_key, &opts.key)?;

        match self.read_tiers::<T>(&key).await {
            Ok(Some((value, SwrState::Fresh))) => return Ok(value),
            Ok(Some((value, SwrState::Stale))) => {
                self.trigger_revalidation(key.clone(), loader.clone(), &opts);
                return Ok(value);
            }
            Ok(Some((_, SwrState::Expired))) | Ok(None) => {}
            Err(e) => warn!(error = %e, key, "cache read failed during get_or_set, falling through to loader"),
        }

        let set_opts = SetOptions {
            key: opts.key.clone(),
            ttl_secs: opts.ttl_secs,
            tags: opts.tags.clone(),
            strategy: opts.strategy,
            swr_stale_secs: opts.swr_stale_secs,
        };

        let serializer = Arc::clone(&self.serializer);
        let key_for_loader = key.clone();
        let result = match &self.stampede {
            Some(stampede) => {
                stampede
                    .protect(&key_for_loader, move || async move {
                        let value = loader().await.map_err(|e| CacheError::loader(e.to_string()))?;
                        let stored = StoredValue::Plain(CacheEntry::new(value, 0, Vec::new()));
                        let json = serde_json::to_value(&stored).map_err(|e| CacheError::serialization(e.to_string()))?;
                        serializer.encode(&json)
                    })
                    .await
                    .and_then(|protected| {
                        self.decode::<T>(&protected.value).map(|stored| match stored {
                            StoredValue::Plain(e) => e.value,
                            StoredValue::Swr(e) => e.value,
                        })
                    })
            }
            None => loader().await.map_err(|e| CacheError::loader(e.to_string())),
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => return Err(e),
        };

        let skip_caching = opts.unless.as_ref().map(|f| f(&value)).unwrap_or(false);
        if !skip_caching {
            if let Err(e) = self.set(raw_key, value.clone(), &set_opts).await {
                warn!(error = %e, key, "failed to populate cache after loader call");
            }
        }

        Ok(value)
    }

    fn trigger_revalidation<T, L, Fut>(&self, key: String, loader: L, opts: &GetOrSetOptions<T>)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        L: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        if !self.swr.should_revalidate(&key) {
            return;
        }
        let fresh_ttl = opts.ttl_secs.unwrap_or(3600);
        let tags = opts.tags.clone();
        let stale_secs = opts.swr_stale_secs;
        let writes_l1 = opts.strategy.writes_l1();
        let writes_l2 = opts.strategy.writes_l2();
        let l1_ttl_secs = self.config.l1.ttl_secs.max(1);
        let l2_ttl_secs = match stale_secs {
            Some(s) => (fresh_ttl + s).min(self.config.l2.max_ttl_secs),
            None => fresh_ttl.min(self.config.l2.max_ttl_secs),
        };
        let l1 = self.l1.clone();
        let l2 = self.l2.clone();
        let tag_index = self.tag_index.clone();
        let serializer = Arc::clone(&self.serializer);
        let success_key = key.clone();
        let success_tags = tags.clone();

        self.swr.schedule_revalidation(
            key,
            move || async move {
                let value = loader().await?;
                let stored = match stale_secs {
                    Some(s) => StoredValue::Swr(SwrEntry::new(value, fresh_ttl, s, tags)),
                    None => StoredValue::Plain(CacheEntry::new(value, fresh_ttl, tags)),
                };
                let json = serde_json::to_value(&stored)?;
                serializer.encode(&json).map_err(|e| anyhow::anyhow!(e.to_string()))
            },
            move |bytes| async move {
                if writes_l1 {
                    if let Some(l1) = &l1 {
                        l1.set(&success_key, bytes.clone(), Some(l1_ttl_secs)).await;
                    }
                }
                if writes_l2 {
                    if let Some(l2) = &l2 {
                        if let Err(e) = l2.set(&success_key, bytes, l2_ttl_secs).await {
                            warn!(error = %e, key = %success_key, "background revalidation failed to write l2");
                            return;
                        }
                        if let Some(tag_index) = &tag_index {
                            if !success_tags.is_empty() {
                                if let Err(e) = tag_index.add_key_to_tags(&l2.fq_key(&success_key), &success_tags).await {
                                    warn!(error = %e, key = %success_key, "background revalidation failed to register tags");
                                }
                            }
                        }
                    }
                }
            },
            |e| warn!(error = %e, "background revalidation loader failed"),
        );
    }

    pub async fn invalidate_tag(&self, tag: &str) -> CacheResult<u64> {
        self.invalidate_tags(std::slice::from_ref(&tag.to_string())).await
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let Some(tag_index) = &self.tag_index else {
            return Ok(0);
        };
        let mut total = 0u64;
        let mut invalidated_keys: Vec<String> = Vec::new();
        for tag in tags {
            let members = tag_index.get_keys_by_tag(tag).await?;
            let l2_ref = self.l2.as_ref();
            for fq_key in &members {
                let raw = l2_ref.map(|l2| l2.strip_prefix(fq_key)).unwrap_or(fq_key.as_str());
                if let Some(l1) = &self.l1 {
                    l1.delete(raw).await;
                }
                invalidated_keys.push(raw.to_string());
            }
            total += tag_index.invalidate_tag(tag).await?;
        }
        if !invalidated_keys.is_empty() {
            self.publish_invalidation(InvalidationMessage::remove_bulk(invalidated_keys)).await;
        }
        Ok(total)
    }

    /// Scans keys matching a raw (already-enriched-by-caller) pattern and
    /// deletes them from both tiers. L2-only: L1 has no pattern index, so
    /// matching L1 entries are left to expire on TTL.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let Some(l2) = &self.l2 else { return Ok(0) };
        let fq_pattern = l2.fq_key(pattern);
        let matched = l2.scan_all(&fq_pattern, 100).await?;
        if matched.is_empty() {
            return Ok(0);
        }
        let mut deleted = 0u64;
        for chunk in matched.chunks(100) {
            deleted += self.l2_driver_del_many(chunk).await?;
        }
        let raw_keys: Vec<String> = matched.iter().map(|fq| l2.strip_prefix(fq).to_string()).collect();
        self.publish_invalidation(InvalidationMessage::remove_bulk(raw_keys)).await;
        Ok(deleted)
    }

    async fn l2_driver_del_many(&self, fq_keys: &[String]) -> CacheResult<u64> {
        match &self.l2 {
            Some(l2) => l2.driver().del_many(fq_keys).await,
            None => Ok(0),
        }
    }

    pub async fn clear(&self) -> CacheResult<()> {
        if let Some(l1) = &self.l1 {
            l1.clear().await;
        }
        if let Some(l2) = &self.l2 {
            let fq_pattern = l2.fq_key("*");
            let keys = l2.scan_all(&fq_pattern, 100).await?;
            for chunk in keys.chunks(100) {
                let _ = l2.driver().del_many(chunk).await;
            }
            if !keys.is_empty() {
                let raw_keys: Vec<String> = keys.iter().map(|fq| l2.strip_prefix(fq).to_string()).collect();
                self.publish_invalidation(InvalidationMessage::remove_bulk(raw_keys)).await;
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> HealthStatus {
        let l1_ok = match &self.l1 {
            Some(l1) => {
                let probe = "__health__";
                l1.set(probe, vec![1], Some(1)).await;
                let ok = l1.has(probe).await;
                l1.delete(probe).await;
                ok
            }
            None => true,
        };
        let l2_ok = match &self.l2 {
            Some(l2) => l2.driver().exists("__health__").await.is_ok(),
            None => true,
        };
        HealthStatus { l1_ok, l2_ok }
    }

    pub fn stats(&self) -> CacheServiceStats {
        CacheServiceStats {
            l1: self.l1.as_ref().map(|l1| l1.stats()),
            stampede: self.stampede.as_ref().map(Stampede::stats).unwrap_or_default(),
            broadcast: self.broadcast_stats.as_ref().map(|s| s.snapshot()),
            active_swr_jobs: self.swr.active_jobs(),
        }
    }

    async fn publish_invalidation(&self, message: InvalidationMessage) {
        if let Some(publisher) = &self.broadcast_publisher {
            let mut publisher = publisher.lock().await;
            if let Err(e) = publisher.publish(&message).await {
                warn!(error = %e, "failed to broadcast invalidation");
            }
        }
    }
}
