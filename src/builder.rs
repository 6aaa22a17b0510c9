//! Builder for [`CacheService`], generalizing the teacher's default-backends
//! convenience (`RedisDriver` reachable from `REDIS_URL`) while letting every
//! seam be swapped: driver, L1 backend, serializer, context provider.

use std::sync::Arc;

use crate::broadcast::{AtomicBroadcastStats, BroadcastConfig, InvalidationPublisher};
use crate::cache_service::CacheService;
use crate::config::CacheConfig;
use crate::drivers::RedisDriver;
use crate::error::{CacheError, CacheResult};
use crate::key_codec::KeyCodec;
use crate::l1_store::{L1Backend, L1Store};
use crate::l2_store::L2Store;
use crate::stampede::Stampede;
use crate::tag_index::TagIndex;
use crate::traits::{ContextProvider, Driver, Serializer};

struct BroadcastSetup {
    redis_url: String,
    config: BroadcastConfig,
}

/// Constructs a [`CacheService`] from a [`CacheConfig`] plus the pluggable
/// seams: driver, L1 backend, serializer, and context provider. Any seam left
/// unset gets the crate's own default (`RedisDriver`, `L1Store`, `JsonCodec`).
pub struct CacheServiceBuilder {
    config: CacheConfig,
    driver: Option<Arc<dyn Driver>>,
    l1_backend: Option<Arc<dyn L1Backend>>,
    serializer: Option<Arc<dyn Serializer>>,
    context_provider: Option<Arc<dyn ContextProvider>>,
    context_keys: Vec<String>,
    broadcast: Option<BroadcastSetup>,
}

impl Default for CacheServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            driver: None,
            l1_backend: None,
            serializer: None,
            context_provider: None,
            context_keys: Vec::new(),
            broadcast: None,
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Supplies the remote store. If omitted, `build()` connects a
    /// [`RedisDriver`] using `REDIS_URL` (default `redis://127.0.0.1:6379`).
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_l1_backend(mut self, backend: Arc<dyn L1Backend>) -> Self {
        self.l1_backend = Some(backend);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Registers a context source plus the global set of context keys every
    /// enriched key should carry (per-call `vary_by` can add to or override
    /// these).
    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>, keys: Vec<String>) -> Self {
        self.context_provider = Some(provider);
        self.context_keys = keys;
        self
    }

    /// Opts into cross-instance L1 invalidation over Redis Pub/Sub, published
    /// whenever a key is deleted on this instance.
    pub fn with_broadcast(mut self, redis_url: impl Into<String>, config: BroadcastConfig) -> Self {
        self.broadcast = Some(BroadcastSetup {
            redis_url: redis_url.into(),
            config,
        });
        self
    }

    /// # Errors
    /// Returns an error if a default `RedisDriver` or broadcast connection
    /// cannot be established.
    pub async fn build(self) -> CacheResult<CacheService> {
        let driver: Arc<dyn Driver> = match self.driver {
            Some(driver) => driver,
            None => Arc::new(RedisDriver::connect_default().await?),
        };

        let l1_backend: Option<Arc<dyn L1Backend>> = if self.config.l1.enabled {
            Some(self.l1_backend.unwrap_or_else(|| {
                Arc::new(L1Store::new(
                    self.config.l1.max_size,
                    self.config.l1.ttl_secs,
                    self.config.l1.eviction_policy,
                ))
            }))
        } else {
            None
        };

        let l2 = if self.config.l2.enabled {
            Some(L2Store::new(Arc::clone(&driver), &self.config.l2))
        } else {
            None
        };

        let serializer = self.serializer.unwrap_or_else(|| Arc::new(crate::codecs::JsonCodec));

        let stampede = if self.config.stampede.enabled {
            Some(Stampede::new(
                Arc::clone(&driver),
                std::time::Duration::from_millis(self.config.stampede.lock_timeout_ms),
                std::time::Duration::from_millis(self.config.stampede.wait_timeout_ms),
            ))
        } else {
            None
        };

        let tag_index = if self.config.tags.enabled {
            Some(TagIndex::new(
                Arc::clone(&driver),
                self.config.l2.key_prefix.clone(),
                &self.config.tags,
                self.config.tags.effective_ttl_secs(&self.config.l2),
            ))
        } else {
            None
        };

        let key_codec = KeyCodec::new(self.config.keys.clone(), self.context_provider, self.context_keys);

        let (broadcast_publisher, broadcast_stats) = match self.broadcast {
            Some(setup) => {
                let client = redis::Client::open(setup.redis_url.as_str())
                    .map_err(|e| CacheError::operation(format!("invalid broadcast redis url: {e}")))?;
                let conn = redis::aio::ConnectionManager::new(client)
                    .await
                    .map_err(|e| CacheError::operation(format!("failed to connect broadcast publisher: {e}")))?;
                let stats = Arc::new(AtomicBroadcastStats::default());
                let publisher = InvalidationPublisher::new(conn, setup.config, Arc::clone(&stats));
                (Some(tokio::sync::Mutex::new(publisher)), Some(stats))
            }
            None => (None, None),
        };

        Ok(CacheService::new(
            self.config,
            key_codec,
            l1_backend,
            l2,
            serializer,
            stampede,
            tag_index,
            broadcast_publisher,
            broadcast_stats,
        ))
    }
}
