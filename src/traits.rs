//! External contracts the core consumes but does not implement in terms of
//! concrete I/O: the remote store (`Driver`), the byte encoding (`Serializer`),
//! and the multi-tenant context source (`ContextProvider`).
//!
//! The shipped `Driver` implementation is [`crate::drivers::RedisDriver`];
//! tests substitute `tests::common::FakeDriver`. Swapping the driver changes
//! nothing about `CacheService`'s behavior — it is the one seam the rest of
//! this crate treats as opaque.

use async_trait::async_trait;

use crate::error::CacheResult;

/// Minimal surface required of the remote store: GET, SET [EX][NX], DEL,
/// EXISTS, EXPIRE, TTL, MGET, pipelined SET, SCAN, SADD/SREM/SMEMBERS/SCARD,
/// EVAL/EVALSHA/SCRIPT LOAD.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()>;

    /// `SET key value EX ttl_secs NX`. Returns whether the key was set (i.e.
    /// it did not already exist).
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<bool>;

    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// Bulk delete, used for pipelined tag/pattern invalidation. Returns the
    /// number of keys actually removed.
    async fn del_many(&self, keys: &[String]) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<bool>;

    /// `-2` if the key does not exist, `-1` if it exists without a TTL,
    /// otherwise the remaining seconds.
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Pipelined `SET key value EX ttl` for each item.
    async fn pipeline_set(&self, items: &[(String, Vec<u8>, u64)]) -> CacheResult<()>;

    /// `SCAN cursor MATCH pattern COUNT count`. Cursor `0` both starts and
    /// terminates a scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)>;

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    async fn scard(&self, key: &str) -> CacheResult<u64>;

    /// Registers `script` and returns its SHA1 digest.
    async fn script_load(&self, script: &str) -> CacheResult<String>;

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue>;

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue>;
}

/// Return shape of the two Lua scripts this crate ships: the release-lock
/// script returns an integer (0 or 1), the optimized tag-invalidation script
/// returns an integer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptValue {
    Int(i64),
    Nil,
}

impl ScriptValue {
    pub fn as_i64(&self) -> i64 {
        match self {
            ScriptValue::Int(n) => *n,
            ScriptValue::Nil => 0,
        }
    }
}

/// Encodes/decodes the stored envelope to/from bytes. `serde_json::Value` is
/// the traversable intermediate representation (matching `ArgFingerprint`'s
/// own use of `Value`), so the trait stays object-safe despite the generic
/// value types flowing through `CacheService`.
pub trait Serializer: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> CacheResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> CacheResult<serde_json::Value>;
    fn name(&self) -> &'static str;
}

/// `string | number | undefined` from the source contract, represented as a
/// small closed enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Str(String),
    Num(f64),
}

impl ContextValue {
    pub fn to_raw_string(&self) -> String {
        match self {
            ContextValue::Str(s) => s.clone(),
            ContextValue::Num(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

/// Multi-tenant / multi-partition context source consulted by `KeyCodec`.
pub trait ContextProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<ContextValue>;
}
