//! `Driver` implementation over `redis::aio::ConnectionManager`, which
//! reconnects automatically — the same backbone the teacher crate's
//! `RedisCache` uses for its L2 tier.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use crate::error::{CacheError, CacheResult};
use crate::traits::{Driver, ScriptValue};

pub struct RedisDriver {
    conn: ConnectionManager,
}

impl RedisDriver {
    /// Connects using `REDIS_URL`, defaulting to `redis://127.0.0.1:6379`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect_default() -> CacheResult<Self> {
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::connect(&redis_url).await
    }

    /// # Errors
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::operation(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::operation(format!("failed to connect to redis: {e}")))?;
        let mut ping_conn = conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut ping_conn)
            .await
            .map_err(|e| CacheError::operation(format!("redis PING health check failed: {e}")))?;
        info!(redis_url, "connected to redis via ConnectionManager");
        Ok(Self { conn })
    }

    fn driver_err(e: redis::RedisError) -> CacheError {
        CacheError::operation(e.to_string())
    }
}

#[async_trait]
impl Driver for RedisDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(Self::driver_err)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await.map_err(Self::driver_err)?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(Self::driver_err)?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.del(key).await.map_err(Self::driver_err)?;
        Ok(count > 0)
    }

    async fn del_many(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(Self::driver_err)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(Self::driver_err)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_secs as i64).await.map_err(Self::driver_err)
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        conn.ttl(key).await.map_err(Self::driver_err)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        conn.get(keys).await.map_err(Self::driver_err)
    }

    async fn pipeline_set(&self, items: &[(String, Vec<u8>, u64)]) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value, ttl_secs) in items {
            pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(*ttl_secs).ignore();
        }
        pipe.query_async::<()>(&mut conn).await.map_err(Self::driver_err)?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(Self::driver_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.sadd(key, member).await.map_err(Self::driver_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.srem(key, member).await.map_err(Self::driver_err)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(Self::driver_err)
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        conn.scard(key).await.map_err(Self::driver_err)
    }

    async fn script_load(&self, script: &str) -> CacheResult<String> {
        let mut conn = self.conn.clone();
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script)
            .query_async(&mut conn)
            .await
            .map_err(Self::driver_err)
    }

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        let value: i64 = cmd.query_async(&mut conn).await.map_err(Self::driver_err)?;
        Ok(ScriptValue::Int(value))
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> CacheResult<ScriptValue> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        let value: i64 = cmd.query_async(&mut conn).await.map_err(Self::driver_err)?;
        Ok(ScriptValue::Int(value))
    }
}
