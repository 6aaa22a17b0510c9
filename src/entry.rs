//! The units of storage written by `CacheService` and read back through
//! `L1Store`/`L2Store`. Both tiers are byte-oriented (see `traits::Serializer`);
//! these types are what gets serialized onto and deserialized off of that
//! boundary.

use serde::{Deserialize, Serialize};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Plain cached value with expiry, no staleness window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: i64,
    pub ttl_secs: u64,
    pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl_secs: u64, tags: Vec<String>) -> Self {
        Self {
            value,
            cached_at: now_ms(),
            ttl_secs,
            tags,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now - self.cached_at > self.ttl_secs as i64 * 1000
    }

    /// Remaining time-to-live in whole seconds, floored at zero.
    pub fn remaining_ttl_secs(&self, now: i64) -> u64 {
        let elapsed_ms = (now - self.cached_at).max(0);
        let total_ms = self.ttl_secs as i64 * 1000;
        ((total_ms - elapsed_ms).max(0) / 1000) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwrState {
    Fresh,
    Stale,
    Expired,
}

/// Envelope used when stale-while-revalidate is enabled on a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwrEntry<T> {
    pub value: T,
    pub cached_at: i64,
    pub stale_at: i64,
    pub expires_at: i64,
    pub tags: Vec<String>,
}

impl<T> SwrEntry<T> {
    pub fn new(value: T, fresh_ttl_secs: u64, stale_ttl_secs: u64, tags: Vec<String>) -> Self {
        let cached_at = now_ms();
        let stale_at = cached_at + fresh_ttl_secs as i64 * 1000;
        let expires_at = stale_at + stale_ttl_secs as i64 * 1000;
        Self {
            value,
            cached_at,
            stale_at,
            expires_at,
            tags,
        }
    }

    pub fn is_stale(&self, now: i64, swr_enabled: bool) -> bool {
        swr_enabled && now > self.stale_at
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn state(&self, now: i64, swr_enabled: bool) -> SwrState {
        if self.is_expired(now) {
            SwrState::Expired
        } else if self.is_stale(now, swr_enabled) {
            SwrState::Stale
        } else {
            SwrState::Fresh
        }
    }

    /// Seconds remaining until `expires_at`, used as the L2 TTL for the envelope.
    pub fn remaining_ttl_secs(&self, now: i64) -> u64 {
        ((self.expires_at - now).max(0) / 1000) as u64
    }
}

/// The wire shape actually written to L1/L2: either a plain entry or an SWR
/// envelope. Stored as one serialized blob so a single byte buffer round-trips
/// through both tiers regardless of which variant produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoredValue<T> {
    Plain(CacheEntry<T>),
    Swr(SwrEntry<T>),
}

impl<T> StoredValue<T> {
    pub fn tags(&self) -> &[String] {
        match self {
            StoredValue::Plain(e) => &e.tags,
            StoredValue::Swr(e) => &e.tags,
        }
    }
}
