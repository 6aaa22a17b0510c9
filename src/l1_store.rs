//! Bounded in-memory L1 tier: LRU or LFU replacement, per-entry expiry,
//! hit/miss counters.
//!
//! Nodes live in a slab (`Vec<Option<Slot>>` plus a free-list of recycled
//! indices) rather than a heap-allocated linked list, per the arena-with-
//! stable-indices approach for emulating a doubly-linked list without a
//! garbage collector. `parking_lot::Mutex` guards the slab because this runs
//! on tokio's multi-threaded scheduler, where two `set` calls for the same
//! key can race across worker threads.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::EvictionPolicy;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Slot {
    key: String,
    payload: Vec<u8>,
    expires_at_ms: i64,
    prev: Option<usize>,
    next: Option<usize>,
    freq: u64,
    seq: u64,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    freq_order: BTreeMap<(u64, u64), usize>,
    seq_counter: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            freq_order: BTreeMap::new(),
            seq_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("unlink: live slot");
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => {
                if let Some(s) = self.slots[p].as_mut() {
                    s.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slots[n].as_mut() {
                    s.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(s) = self.slots[h].as_mut() {
                s.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn bump_freq(&mut self, idx: usize) {
        let (old_freq, seq) = {
            let slot = self.slots[idx].as_ref().expect("bump_freq: live slot");
            (slot.freq, slot.seq)
        };
        self.freq_order.remove(&(old_freq, seq));
        let new_freq = old_freq + 1;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.freq = new_freq;
        }
        self.freq_order.insert((new_freq, seq), idx);
    }

    fn alloc(&mut self, key: String, payload: Vec<u8>, expires_at_ms: i64, policy: EvictionPolicy) -> usize {
        let seq = self.seq_counter;
        self.seq_counter += 1;
        let slot = Slot {
            key,
            payload,
            expires_at_ms,
            prev: None,
            next: None,
            freq: 1,
            seq,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        match policy {
            EvictionPolicy::Lru => self.push_front(idx),
            EvictionPolicy::Lfu => {
                self.freq_order.insert((1, seq), idx);
            }
        }
        idx
    }

    /// Removes the node at `idx` from every structure that references it:
    /// the key index, the LRU list, the LFU ordering, and finally frees the
    /// slot itself. The node is in the map iff it is in the list/ordering —
    /// this is the one place that invariant is broken and repaired.
    fn remove_idx(&mut self, idx: usize, policy: EvictionPolicy) {
        let key = {
            let slot = self.slots[idx].as_ref().expect("remove_idx: live slot");
            slot.key.clone()
        };
        match policy {
            EvictionPolicy::Lru => self.unlink(idx),
            EvictionPolicy::Lfu => {
                let (freq, seq) = {
                    let slot = self.slots[idx].as_ref().expect("remove_idx: live slot");
                    (slot.freq, slot.seq)
                };
                self.freq_order.remove(&(freq, seq));
            }
        }
        self.index.remove(&key);
        self.slots[idx] = None;
        self.free.push(idx);
    }

    fn evict_one(&mut self, policy: EvictionPolicy) {
        let victim = match policy {
            EvictionPolicy::Lru => self.tail,
            EvictionPolicy::Lfu => self.freq_order.values().next().copied(),
        };
        if let Some(idx) = victim {
            self.remove_idx(idx, policy);
        }
    }
}

/// Snapshot of lifetime counters; not persisted across restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Stats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[async_trait]
pub trait L1Backend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, payload: Vec<u8>, ttl_secs: Option<u64>);
    async fn delete(&self, key: &str) -> bool;
    async fn has(&self, key: &str) -> bool;
    async fn clear(&self);
    async fn size(&self) -> usize;
    fn stats(&self) -> L1Stats;
}

pub struct L1Store {
    inner: Mutex<Inner>,
    max_size: usize,
    default_ttl_secs: u64,
    policy: EvictionPolicy,
}

impl L1Store {
    pub fn new(max_size: usize, default_ttl_secs: u64, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            max_size: max_size.max(1),
            default_ttl_secs,
            policy,
        }
    }
}

#[async_trait]
impl L1Backend for L1Store {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = now_ms();
        let mut inner = self.inner.lock();
        let Some(&idx) = inner.index.get(key) else {
            inner.misses += 1;
            return None;
        };
        let expired = matches!(&inner.slots[idx], Some(s) if now > s.expires_at_ms);
        if expired {
            inner.remove_idx(idx, self.policy);
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        match self.policy {
            EvictionPolicy::Lru => inner.move_to_front(idx),
            EvictionPolicy::Lfu => inner.bump_freq(idx),
        }
        inner.slots[idx].as_ref().map(|s| s.payload.clone())
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl_secs: Option<u64>) {
        let now = now_ms();
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let expires_at_ms = now + ttl as i64 * 1000;
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.index.get(key) {
            if let Some(slot) = inner.slots[idx].as_mut() {
                slot.payload = payload;
                slot.expires_at_ms = expires_at_ms;
            }
            match self.policy {
                EvictionPolicy::Lru => inner.move_to_front(idx),
                EvictionPolicy::Lfu => inner.bump_freq(idx),
            }
            return;
        }

        if inner.index.len() >= self.max_size {
            inner.evict_one(self.policy);
        }
        let idx = inner.alloc(key.to_string(), payload, expires_at_ms, self.policy);
        inner.index.insert(key.to_string(), idx);
    }

    async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.index.get(key) {
            inner.remove_idx(idx, self.policy);
            true
        } else {
            false
        }
    }

    async fn has(&self, key: &str) -> bool {
        let now = now_ms();
        let mut inner = self.inner.lock();
        let Some(&idx) = inner.index.get(key) else {
            return false;
        };
        let expired = matches!(&inner.slots[idx], Some(s) if now > s.expires_at_ms);
        if expired {
            inner.remove_idx(idx, self.policy);
            return false;
        }
        true
    }

    async fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    async fn size(&self) -> usize {
        let now = now_ms();
        let mut inner = self.inner.lock();
        let expired: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&idx| matches!(&inner.slots[idx], Some(s) if now > s.expires_at_ms))
            .collect();
        for idx in expired {
            inner.remove_idx(idx, self.policy);
        }
        inner.index.len()
    }

    fn stats(&self) -> L1Stats {
        let inner = self.inner.lock();
        L1Stats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.index.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u8) -> Vec<u8> {
        vec![n]
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_used() {
        let store = L1Store::new(3, 60, EvictionPolicy::Lru);
        store.set("k1", payload(1), None).await;
        store.set("k2", payload(2), None).await;
        store.set("k3", payload(3), None).await;
        assert_eq!(store.get("k1").await, Some(payload(1)));
        store.set("k4", payload(4), None).await;

        assert_eq!(store.get("k2").await, None);
        assert_eq!(store.get("k1").await, Some(payload(1)));
        assert_eq!(store.get("k3").await, Some(payload(3)));
        assert_eq!(store.get("k4").await, Some(payload(4)));
    }

    #[tokio::test]
    async fn lfu_evicts_minimum_frequency() {
        let store = L1Store::new(3, 60, EvictionPolicy::Lfu);
        store.set("k1", payload(1), None).await;
        store.set("k2", payload(2), None).await;
        store.set("k3", payload(3), None).await;
        // k1 accessed twice more than k2/k3.
        store.get("k1").await;
        store.get("k1").await;
        store.get("k3").await;

        store.set("k4", payload(4), None).await;

        assert_eq!(store.get("k2").await, None, "k2 had the minimum frequency");
        assert!(store.get("k1").await.is_some());
        assert!(store.get("k3").await.is_some());
        assert!(store.get("k4").await.is_some());
    }

    #[tokio::test]
    async fn max_size_one_evicts_previous_entry_on_every_write() {
        let store = L1Store::new(1, 60, EvictionPolicy::Lru);
        store.set("k1", payload(1), None).await;
        store.set("k2", payload(2), None).await;
        assert_eq!(store.get("k1").await, None);
        assert_eq!(store.get("k2").await, Some(payload(2)));
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_misses_and_swept() {
        let store = L1Store::new(10, 0, EvictionPolicy::Lru);
        store.set("k1", payload(1), Some(0)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.get("k1").await, None);
        assert_eq!(store.size().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_both_map_and_list() {
        let store = L1Store::new(10, 60, EvictionPolicy::Lru);
        store.set("k1", payload(1), None).await;
        store.set("k2", payload(2), None).await;
        store.clear().await;
        assert_eq!(store.size().await, 0);
        assert_eq!(store.get("k1").await, None);
    }
}
