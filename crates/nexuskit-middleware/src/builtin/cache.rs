//! Response caching middleware with tiered storage and pluggable eviction.
//!
//! Keys are a SHA-256 digest of the request frame with `request_id` zeroed
//! out, so retries and genuinely repeated requests hash identically. A
//! `handle_outgoing` cache hit short-circuits the flow with the stored
//! response bytes; a `handle_incoming` response is stored under whatever
//! key its matching outgoing request computed, tracked via `request_id`
//! while the call is in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use nexuskit_proto::Header;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::MiddlewareError;
use crate::pipeline::{FlowContext, Middleware, MiddlewareOutcome};

pub type CacheKey = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Ttl(Duration),
    SizeBased,
}

#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    pub policy: EvictionPolicy,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_size_bytes: 16 * 1024 * 1024,
            policy: EvictionPolicy::Lru,
        }
    }
}

struct Entry {
    bytes: Bytes,
    inserted_at: Instant,
    access_count: u64,
}

/// One cache tier: a bounded map plus an access-order queue, evicted
/// according to its configured [`EvictionPolicy`].
struct Tier {
    config: TierConfig,
    entries: HashMap<CacheKey, Entry>,
    order: VecDeque<CacheKey>,
    total_size: usize,
}

impl Tier {
    fn new(config: TierConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
            total_size: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Bytes> {
        if let EvictionPolicy::Ttl(ttl) = self.config.policy {
            if let Some(entry) = self.entries.get(key) {
                if entry.inserted_at.elapsed() > ttl {
                    self.remove(key);
                    return None;
                }
            }
        }

        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        let bytes = entry.bytes.clone();

        if matches!(self.config.policy, EvictionPolicy::Lru) {
            self.order.retain(|k| k != key);
            self.order.push_back(*key);
        }
        Some(bytes)
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.bytes.len();
        self.order.retain(|k| k != key);
        Some(entry)
    }

    /// Insert `bytes` under `key`, evicting as needed, and report anything
    /// evicted so a caller can demote it into a lower tier.
    fn insert(&mut self, key: CacheKey, bytes: Bytes, evicted_out: &mut Vec<(CacheKey, Bytes)>) {
        if self.entries.contains_key(&key) {
            self.remove(&key);
        }
        self.total_size += bytes.len();
        self.entries.insert(
            key,
            Entry {
                bytes,
                inserted_at: Instant::now(),
                access_count: 0,
            },
        );
        self.order.push_back(key);

        while self.entries.len() > self.config.max_entries
            || self.total_size > self.config.max_size_bytes
        {
            let Some(victim) = self.pick_victim() else {
                break;
            };
            if let Some(entry) = self.remove(&victim) {
                evicted_out.push((victim, entry.bytes));
            } else {
                break;
            }
        }
    }

    fn pick_victim(&self) -> Option<CacheKey> {
        match self.config.policy {
            EvictionPolicy::Lru | EvictionPolicy::Fifo | EvictionPolicy::Ttl(_) => {
                self.order.front().copied()
            }
            EvictionPolicy::Lfu => self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(k, _)| *k),
            EvictionPolicy::SizeBased => self
                .entries
                .iter()
                .max_by_key(|(_, e)| e.bytes.len())
                .map(|(k, _)| *k),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Hash a frame's header (with `request_id` zeroed) and body. Only plain
/// requests are cacheable; heartbeats and responses pass through.
fn frame_cache_key(bytes: &[u8]) -> Option<(u32, CacheKey)> {
    let header = Header::decode(bytes).ok()?;
    if header.is_heartbeat() || header.is_response() {
        return None;
    }
    let body = &bytes[Header::LEN..];

    let mut canonical = header;
    canonical.request_id = 0;

    let mut hasher = Sha256::new();
    hasher.update(canonical.function_id.to_be_bytes());
    hasher.update([canonical.type_flags]);
    hasher.update(body);
    let key: CacheKey = hasher.finalize().into();
    Some((header.request_id, key))
}

pub struct CacheMiddleware {
    name: String,
    priority: u16,
    l1: Mutex<Tier>,
    l2: Option<Mutex<Tier>>,
    pending: DashMap<u32, CacheKey>,
    stats: CacheStats,
}

impl CacheMiddleware {
    pub fn new(name: impl Into<String>, priority: u16, l1: TierConfig) -> Self {
        Self {
            name: name.into(),
            priority,
            l1: Mutex::new(Tier::new(l1)),
            l2: None,
            pending: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn with_l2(mut self, l2: TierConfig) -> Self {
        self.l2 = Some(Mutex::new(Tier::new(l2)));
        self
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn total_entries(&self) -> usize {
        let mut total = self.l1.lock().len();
        if let Some(l2) = &self.l2 {
            total += l2.lock().len();
        }
        total
    }

    fn get(&self, key: &CacheKey) -> Option<Bytes> {
        if let Some(bytes) = self.l1.lock().get(key) {
            return Some(bytes);
        }
        let l2 = self.l2.as_ref()?;
        let bytes = l2.lock().get(key)?;
        // Promote into L1; anything L1 evicts demotes back into L2.
        let mut demoted = Vec::new();
        self.l1.lock().insert(*key, bytes.clone(), &mut demoted);
        let mut l2_guard = l2.lock();
        for (k, v) in demoted {
            let mut dropped = Vec::new();
            l2_guard.insert(k, v, &mut dropped);
            self.stats
                .evictions
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
        }
        Some(bytes)
    }

    fn insert(&self, key: CacheKey, bytes: Bytes) {
        let mut demoted = Vec::new();
        self.l1.lock().insert(key, bytes, &mut demoted);
        match &self.l2 {
            Some(l2) => {
                let mut l2_guard = l2.lock();
                for (k, v) in demoted {
                    let mut dropped = Vec::new();
                    l2_guard.insert(k, v, &mut dropped);
                    self.stats
                        .evictions
                        .fetch_add(dropped.len() as u64, Ordering::Relaxed);
                }
            }
            None => {
                self.stats
                    .evictions
                    .fetch_add(demoted.len() as u64, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait::async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    async fn handle_outgoing(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        let Some((request_id, key)) = frame_cache_key(&bytes) else {
            return Ok(MiddlewareOutcome::Continue(bytes));
        };

        if let Some(cached) = self.get(&key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(MiddlewareOutcome::ShortCircuit(cached));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(request_id, key);
        Ok(MiddlewareOutcome::Continue(bytes))
    }

    async fn handle_incoming(
        &self,
        bytes: Bytes,
        _ctx: &FlowContext,
    ) -> Result<MiddlewareOutcome, MiddlewareError> {
        if let Ok(header) = Header::decode(&bytes) {
            if let Some((_, key)) = self.pending.remove(&header.request_id) {
                self.insert(key, bytes.clone());
            }
        }
        Ok(MiddlewareOutcome::Continue(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexuskit_proto::Frame;

    fn request_frame(function_id: u32, request_id: u32, body: &[u8]) -> Bytes {
        let frame = Frame::new(Header::new(function_id, request_id), Bytes::copy_from_slice(body));
        Bytes::from(frame.encode()[4..].to_vec())
    }

    fn response_frame(request_id: u32, body: &[u8]) -> Bytes {
        let mut header = Header::new(1, request_id);
        header.response_flag = 1;
        header.code = 200;
        let frame = Frame::new(header, Bytes::copy_from_slice(body));
        Bytes::from(frame.encode()[4..].to_vec())
    }

    #[tokio::test]
    async fn second_identical_request_is_a_cache_hit() {
        let cache = CacheMiddleware::new("cache", 5, TierConfig::default());
        let ctx = FlowContext::new(1, crate::pipeline::Direction::Outgoing);

        let req1 = request_frame(1, 10, b"hello");
        let miss = cache.handle_outgoing(req1.clone(), &ctx).await.unwrap();
        assert!(matches!(miss, MiddlewareOutcome::Continue(_)));

        let resp = response_frame(10, b"received: hello");
        cache.handle_incoming(resp.clone(), &ctx).await.unwrap();

        let req2 = request_frame(1, 11, b"hello");
        let hit = cache.handle_outgoing(req2, &ctx).await.unwrap();
        match hit {
            MiddlewareOutcome::ShortCircuit(bytes) => assert_eq!(bytes, resp),
            _ => panic!("expected cache hit to short-circuit"),
        }

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn lru_eviction_respects_max_entries() {
        let cache = CacheMiddleware::new(
            "cache",
            5,
            TierConfig {
                max_entries: 1,
                max_size_bytes: usize::MAX,
                policy: EvictionPolicy::Lru,
            },
        );
        let ctx = FlowContext::new(1, crate::pipeline::Direction::Outgoing);

        cache
            .handle_outgoing(request_frame(1, 1, b"a"), &ctx)
            .await
            .unwrap();
        cache
            .handle_incoming(response_frame(1, b"resp-a"), &ctx)
            .await
            .unwrap();
        assert_eq!(cache.total_entries(), 1);

        cache
            .handle_outgoing(request_frame(1, 2, b"b"), &ctx)
            .await
            .unwrap();
        cache
            .handle_incoming(response_frame(2, b"resp-b"), &ctx)
            .await
            .unwrap();

        assert_eq!(cache.total_entries(), 1);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[tokio::test]
    async fn ttl_entries_expire() {
        let cache = CacheMiddleware::new(
            "cache",
            5,
            TierConfig {
                max_entries: 10,
                max_size_bytes: usize::MAX,
                policy: EvictionPolicy::Ttl(Duration::from_millis(1)),
            },
        );
        let ctx = FlowContext::new(1, crate::pipeline::Direction::Outgoing);

        cache
            .handle_outgoing(request_frame(1, 1, b"a"), &ctx)
            .await
            .unwrap();
        cache
            .handle_incoming(response_frame(1, b"resp-a"), &ctx)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = cache
            .handle_outgoing(request_frame(1, 2, b"a"), &ctx)
            .await
            .unwrap();
        assert!(matches!(result, MiddlewareOutcome::Continue(_)));
    }
}
