//! Shared test infrastructure: an in-memory `Driver` so integration tests
//! exercise the full `CacheService` stack without a live Redis.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tiercache::{CacheError, CacheResult, Driver, ScriptValue};

struct StoredEntry {
    value: Vec<u8>,
    expires_at_ms: Option<i64>,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A fully in-memory `Driver`: strings, sets, and a tiny Lua interpreter that
/// understands exactly the one script this crate ships (compare-and-delete).
pub struct FakeDriver {
    strings: DashMap<String, StoredEntry>,
    sets: DashMap<String, std::collections::HashSet<String>>,
    scripts: DashMap<String, String>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
            sets: DashMap::new(),
            scripts: DashMap::new(),
        }
    }

    fn is_live(entry: &StoredEntry) -> bool {
        match entry.expires_at_ms {
            Some(exp) => now_ms() < exp,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.strings.iter().filter(|e| Self::is_live(e.value())).count()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.strings.get(key).filter(|e| Self::is_live(e.value())).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()> {
        self.strings.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at_ms: Some(now_ms() + ttl_secs as i64 * 1000),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<bool> {
        if self.strings.get(key).is_some_and(|e| Self::is_live(e.value())) {
            return Ok(false);
        }
        self.strings.insert(
            key.to_string(),
            StoredEntry {
                value: value.as_bytes().to_vec(),
                expires_at_ms: Some(now_ms() + ttl_secs as i64 * 1000),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        Ok(self.strings.remove(key).is_some())
    }

    async fn del_many(&self, keys: &[String]) -> CacheResult<u64> {
        let mut count = 0u64;
        for key in keys {
            if self.strings.remove(key).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.strings.get(key).is_some_and(|e| Self::is_live(e.value())))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<bool> {
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at_ms = Some(now_ms() + ttl_secs as i64 * 1000);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        match self.strings.get(key) {
            None => Ok(-2),
            Some(entry) if !Self::is_live(entry.value()) => Ok(-2),
            Some(entry) => match entry.expires_at_ms {
                None => Ok(-1),
                Some(exp) => Ok(((exp - now_ms()).max(0)) / 1000),
            },
        }
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn pipeline_set(&self, items: &[(String, Vec<u8>, u64)]) -> CacheResult<()> {
        for (key, value, ttl) in items {
            self.set_ex(key, value.clone(), *ttl).await?;
        }
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        let all: Vec<String> = self
            .strings
            .iter()
            .filter(|e| Self::is_live(e.value()))
            .map(|e| e.key().clone())
            .filter(|k| glob_match(pattern, k))
            .collect();
        let start = cursor as usize;
        let end = (start + count).min(all.len());
        let page = all.get(start..end).unwrap_or_default().to_vec();
        let next_cursor = if end >= all.len() { 0 } else { end as u64 };
        Ok((next_cursor, page))
    }

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()> {
        self.sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(self.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        Ok(self.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn script_load(&self, script: &str) -> CacheResult<String> {
        let sha = format!("{:x}", md5_like_hash(script));
        self.scripts.insert(sha.clone(), script.to_string());
        Ok(sha)
    }

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue> {
        let script = self
            .scripts
            .get(sha)
            .map(|s| s.clone())
            .ok_or_else(|| CacheError::operation("NOSCRIPT no matching script"))?;
        self.eval(&script, keys, args).await
    }

    /// Only understands the lock-release compare-and-delete script this
    /// crate ships; anything else errors.
    async fn eval(&self, _script: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue> {
        let key = keys.first().ok_or_else(|| CacheError::operation("missing KEYS[1]"))?;
        let expected = args.first().ok_or_else(|| CacheError::operation("missing ARGV[1]"))?;
        let current = self.strings.get(key).map(|e| e.value.clone());
        match current {
            Some(bytes) if bytes == expected.as_bytes() => {
                self.strings.remove(key);
                Ok(ScriptValue::Int(1))
            }
            _ => Ok(ScriptValue::Int(0)),
        }
    }
}

fn md5_like_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        candidate.starts_with(prefix)
    } else {
        pattern == candidate
    }
}

/// A fixed-value `ContextProvider` for enrichment tests.
pub struct FixedContextProvider(HashMap<String, tiercache::ContextValue>);

impl FixedContextProvider {
    pub fn new(pairs: Vec<(&str, &str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), tiercache::ContextValue::Str(v.to_string())))
                .collect(),
        )
    }
}

impl tiercache::ContextProvider for FixedContextProvider {
    fn get(&self, name: &str) -> Option<tiercache::ContextValue> {
        self.0.get(name).cloned()
    }
}

pub fn fake_driver() -> Arc<FakeDriver> {
    Arc::new(FakeDriver::new())
}
