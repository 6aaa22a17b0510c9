//! Thin mapping from logical cache operations to `Driver` commands. Key
//! prefixing is applied once at this boundary — callers pass the enriched
//! key, this module prepends `l2Prefix` before talking to the driver.
//!
//! Serialization into bytes is entirely the caller's concern; this store
//! never inspects payloads.

use std::sync::Arc;

use crate::config::L2Config;
use crate::error::CacheResult;
use crate::traits::Driver;

#[derive(Clone)]
pub struct L2Store {
    driver: Arc<dyn Driver>,
    key_prefix: String,
}

impl L2Store {
    pub fn new(driver: Arc<dyn Driver>, config: &L2Config) -> Self {
        Self {
            driver,
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn fq_key(&self, enriched_key: &str) -> String {
        format!("{}{enriched_key}", self.key_prefix)
    }

    /// Strips `l2Prefix` back off a fully-qualified key, used when mirroring
    /// a tag invalidation into the L1 tier (which never stores the prefix).
    pub fn strip_prefix<'a>(&self, fq_key: &'a str) -> &'a str {
        fq_key.strip_prefix(self.key_prefix.as_str()).unwrap_or(fq_key)
    }

    pub async fn get(&self, enriched_key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.driver.get(&self.fq_key(enriched_key)).await
    }

    pub async fn set(&self, enriched_key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()> {
        self.driver.set_ex(&self.fq_key(enriched_key), value, ttl_secs).await
    }

    pub async fn delete(&self, enriched_key: &str) -> CacheResult<bool> {
        self.driver.del(&self.fq_key(enriched_key)).await
    }

    pub async fn has(&self, enriched_key: &str) -> CacheResult<bool> {
        self.driver.exists(&self.fq_key(enriched_key)).await
    }

    /// `-2` missing, `-1` no expiry, otherwise remaining seconds.
    pub async fn ttl(&self, enriched_key: &str) -> CacheResult<i64> {
        self.driver.ttl(&self.fq_key(enriched_key)).await
    }

    pub async fn get_many(&self, enriched_keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let fq_keys: Vec<String> = enriched_keys.iter().map(|k| self.fq_key(k)).collect();
        self.driver.mget(&fq_keys).await
    }

    pub async fn set_many(&self, items: &[(String, Vec<u8>, u64)]) -> CacheResult<()> {
        let fq_items: Vec<(String, Vec<u8>, u64)> = items
            .iter()
            .map(|(k, v, ttl)| (self.fq_key(k), v.clone(), *ttl))
            .collect();
        self.driver.pipeline_set(&fq_items).await
    }

    pub async fn delete_many(&self, enriched_keys: &[String]) -> CacheResult<u64> {
        let fq_keys: Vec<String> = enriched_keys.iter().map(|k| self.fq_key(k)).collect();
        self.driver.del_many(&fq_keys).await
    }

    /// `SCAN`-iterates the full keyspace matching `pattern` (already prefix-
    /// qualified by the caller), returning every discovered key across as
    /// many rounds as needed.
    pub async fn scan_all(&self, pattern: &str, count: usize) -> CacheResult<Vec<String>> {
        let mut cursor = 0u64;
        let mut found = Vec::new();
        loop {
            let (next_cursor, keys) = self.driver.scan(cursor, pattern, count).await?;
            found.extend(keys);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(found)
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}
