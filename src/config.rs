//! Public configuration surface, mirroring the recognized top-level options.
//!
//! Every nested config has a `Default` impl matching the documented default,
//! so `CacheConfig::default()` alone produces a usable (L1+L2, LRU, no SWR)
//! service when paired with a driver via `CacheServiceBuilder`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::Lru
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub eviction_policy: EvictionPolicy,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl_secs: 60,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Config {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            max_ttl_secs: 86400,
            key_prefix: "cache:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedeConfig {
    pub enabled: bool,
    pub lock_timeout_ms: u64,
    pub wait_timeout_ms: u64,
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_timeout_ms: 5_000,
            wait_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwrConfig {
    pub enabled: bool,
    pub default_stale_secs: u64,
}

impl Default for SwrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_stale_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    pub enabled: bool,
    pub index_prefix: String,
    pub max_tags_per_key: usize,
    /// `None` defers to `l2.max_ttl_secs`, per the spec's `ttl?=l2.maxTtl` default.
    pub ttl_secs: Option<u64>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_prefix: "_tag:".to_string(),
            max_tags_per_key: 10,
            ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    pub max_length: usize,
    pub version: Option<String>,
    pub separator: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            max_length: 1024,
            version: None,
            separator: ":".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub stampede: StampedeConfig,
    pub swr: SwrConfig,
    pub tags: TagsConfig,
    pub keys: KeysConfig,
}

impl TagsConfig {
    pub fn effective_ttl_secs(&self, l2: &L2Config) -> u64 {
        self.ttl_secs.unwrap_or(l2.max_ttl_secs)
    }
}
