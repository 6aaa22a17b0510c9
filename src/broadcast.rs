//! Opt-in cross-instance L1 invalidation via Redis Pub/Sub.
//!
//! This is additive to the portable, per-member `DEL` invalidation path:
//! other processes' L1 tiers evict the same keys without waiting for TTL.
//! Off by default — `CacheService` only constructs a publisher/subscriber
//! pair when the caller opts in via the builder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// A cache-mutation event broadcast across instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InvalidationMessage {
    Remove { key: String },
    RemoveBulk { keys: Vec<String> },
}

impl InvalidationMessage {
    pub fn remove(key: impl Into<String>) -> Self {
        Self::Remove { key: key.into() }
    }

    pub fn remove_bulk(keys: Vec<String>) -> Self {
        Self::RemoveBulk { keys }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize invalidation message")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to deserialize invalidation message")
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub channel: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel: "tiercache:invalidate".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub processing_errors: u64,
}

#[derive(Debug, Default)]
pub struct AtomicBroadcastStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub processing_errors: AtomicU64,
}

impl AtomicBroadcastStats {
    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Publishes invalidation events to other instances.
pub struct InvalidationPublisher {
    connection: redis::aio::ConnectionManager,
    config: BroadcastConfig,
    stats: Arc<AtomicBroadcastStats>,
}

impl InvalidationPublisher {
    pub fn new(connection: redis::aio::ConnectionManager, config: BroadcastConfig, stats: Arc<AtomicBroadcastStats>) -> Self {
        Self {
            connection,
            config,
            stats,
        }
    }

    pub async fn publish(&mut self, message: &InvalidationMessage) -> Result<()> {
        let json = message.to_json()?;
        let _: () = self
            .connection
            .publish(&self.config.channel, &json)
            .await
            .context("failed to publish invalidation message")?;
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Subscribes to the invalidation channel and dispatches to a handler on a
/// background task; reconnects with a 5s backoff on connection loss.
pub struct InvalidationSubscriber {
    client: redis::Client,
    config: BroadcastConfig,
    stats: Arc<AtomicBroadcastStats>,
    shutdown_tx: broadcast::Sender<()>,
}

impl InvalidationSubscriber {
    pub fn new(redis_url: &str, config: BroadcastConfig, stats: Arc<AtomicBroadcastStats>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("failed to create redis client for subscriber")?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            client,
            config,
            stats,
            shutdown_tx,
        })
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.snapshot()
    }

    pub fn start<F, Fut>(&self, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let client = self.client.clone();
        let channel = self.config.channel.clone();
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let handler = Arc::new(handler);
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!("invalidation subscriber shutting down");
                    break;
                }
                match Self::run_loop(&client, &channel, Arc::clone(&handler), Arc::clone(&stats), &mut shutdown_rx).await {
                    Ok(()) => {
                        info!("invalidation subscriber loop completed normally");
                        break;
                    }
                    Err(e) => {
                        error!("invalidation subscriber error: {e}, reconnecting in 5s");
                        stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {},
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
        })
    }

    async fn run_loop<F, Fut>(
        client: &redis::Client,
        channel: &str,
        handler: Arc<F>,
        stats: Arc<AtomicBroadcastStats>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut pubsub = client.get_async_pubsub().await.context("failed to get pubsub connection")?;
        pubsub.subscribe(channel).await.context("failed to subscribe to channel")?;
        info!(channel, "subscribed to invalidation channel");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!("failed to read invalidation payload: {e}");
                                    stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                                    continue;
                                }
                            };
                            let parsed = match InvalidationMessage::from_json(&payload) {
                                Ok(m) => m,
                                Err(e) => {
                                    warn!("failed to deserialize invalidation message: {e}");
                                    stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                                    continue;
                                }
                            };
                            stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            handler(parsed).await;
                        }
                        None => return Err(anyhow::anyhow!("pub/sub message stream ended")),
                    }
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_messages_through_json() {
        let msg = InvalidationMessage::remove("k1");
        let json = msg.to_json().unwrap();
        match InvalidationMessage::from_json(&json).unwrap() {
            InvalidationMessage::Remove { key } => assert_eq!(key, "k1"),
            _ => panic!("wrong variant"),
        }

        let msg = InvalidationMessage::remove_bulk(vec!["a".into(), "b".into()]);
        let json = msg.to_json().unwrap();
        match InvalidationMessage::from_json(&json).unwrap() {
            InvalidationMessage::RemoveBulk { keys } => assert_eq!(keys, vec!["a", "b"]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn default_config_uses_documented_channel() {
        assert_eq!(BroadcastConfig::default().channel, "tiercache:invalidate");
    }
}
