//! Two-tier caching engine: an in-process L1 (bounded LRU/LFU) in front of a
//! Redis-class L2, with cache-stampede protection, stale-while-revalidate,
//! and tag-based invalidation.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tiercache::{CacheServiceBuilder, GetOrSetOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheServiceBuilder::new().build().await?;
//!
//!     let user: String = cache
//!         .get_or_set(
//!             "user:42",
//!             || async { Ok::<_, anyhow::Error>("alice".to_string()) },
//!             GetOrSetOptions::default(),
//!         )
//!         .await?;
//!     println!("{user}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller → L1 (in-process)  → L2 (Redis)      → loader
//!          hit: return        hit: backfill L1   miss: Stampede.protect
//! ```

pub mod broadcast;
pub mod builder;
pub mod cache_service;
pub mod codecs;
pub mod config;
pub mod drivers;
pub mod entry;
pub mod error;
pub mod invalidation;
pub mod key_codec;
pub mod l1_store;
pub mod l2_store;
pub mod stampede;
pub mod swr;
pub mod tag_index;
pub mod traits;

pub use builder::CacheServiceBuilder;
pub use cache_service::{
    CacheService, CacheServiceStats, GetOrSetOptions, HealthStatus, KeyOptions, SetOptions, WriteStrategy,
};
pub use config::{CacheConfig, EvictionPolicy, KeysConfig, L1Config, L2Config, StampedeConfig, SwrConfig, TagsConfig};
pub use drivers::RedisDriver;
pub use error::{CacheError, CacheResult};
pub use invalidation::{EventPattern, InvalidationRegistry, InvalidationRule, TagTemplate};
pub use key_codec::{ArgFingerprint, KeyCodec};
pub use traits::{ContextProvider, ContextValue, Driver, ScriptValue, Serializer};

// Re-export async_trait so implementors of `Driver`/`L1Backend` don't need
// their own dependency on it.
pub use async_trait::async_trait;
