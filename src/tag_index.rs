//! Per-tag set of member keys, backed by `SADD`/`SMEMBERS`/`SREM` against the
//! driver. Invalidation avoids cluster-unsafe multi-key Lua: it deletes each
//! member individually (chunked for pipelining), then the set itself.

use std::sync::Arc;

use crate::config::TagsConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::Driver;

const DEL_CHUNK_SIZE: usize = 100;

#[derive(Clone)]
pub struct TagIndex {
    driver: Arc<dyn Driver>,
    index_prefix: String,
    l2_key_prefix: String,
    ttl_secs: u64,
    max_tags_per_key: usize,
}

impl TagIndex {
    pub fn new(driver: Arc<dyn Driver>, l2_key_prefix: String, config: &TagsConfig, ttl_secs: u64) -> Self {
        Self {
            driver,
            index_prefix: config.index_prefix.clone(),
            l2_key_prefix,
            ttl_secs,
            max_tags_per_key: config.max_tags_per_key,
        }
    }

    fn tag_set_key(&self, tag: &str) -> String {
        format!("{}{}{tag}", self.l2_key_prefix, self.index_prefix)
    }

    /// Registers `fq_key` (fully-qualified, L2-prefixed) under each of `tags`.
    pub async fn add_key_to_tags(&self, fq_key: &str, tags: &[String]) -> CacheResult<()> {
        if tags.len() > self.max_tags_per_key {
            return Err(CacheError::validation(format!(
                "key carries {} tags, exceeding max_tags_per_key={}",
                tags.len(),
                self.max_tags_per_key
            )));
        }
        for tag in tags {
            let set_key = self.tag_set_key(tag);
            self.driver
                .sadd(&set_key, fq_key)
                .await
                .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))?;
            // Best-effort: the tag set must outlive its longest-lived member.
            let _ = self.driver.expire(&set_key, self.ttl_secs).await;
        }
        Ok(())
    }

    pub async fn remove_key_from_tags(&self, fq_key: &str, tags: &[String]) -> CacheResult<()> {
        for tag in tags {
            let set_key = self.tag_set_key(tag);
            self.driver
                .srem(&set_key, fq_key)
                .await
                .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))?;
        }
        Ok(())
    }

    pub async fn get_keys_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        self.driver
            .smembers(&self.tag_set_key(tag))
            .await
            .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))
    }

    /// Deletes every member key, then the tag set itself. Returns the number
    /// of member keys deleted.
    pub async fn invalidate_tag(&self, tag: &str) -> CacheResult<u64> {
        let set_key = self.tag_set_key(tag);
        let members = self
            .driver
            .smembers(&set_key)
            .await
            .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))?;

        let mut deleted = 0u64;
        for chunk in members.chunks(DEL_CHUNK_SIZE) {
            deleted += self
                .driver
                .del_many(chunk)
                .await
                .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))?;
        }
        self.driver
            .del(&set_key)
            .await
            .map_err(|e| CacheError::tag_invalidation(tag, e.to_string()))?;
        Ok(deleted)
    }

    pub async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<u64> {
        let mut total = 0u64;
        for tag in tags {
            total += self.invalidate_tag(tag).await?;
        }
        Ok(total)
    }
}
