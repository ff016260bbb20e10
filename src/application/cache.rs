//! Two-tier candle-payload cache.
//!
//! Tier order on reads: the optional shared hot tier first, then the
//! in-process warm tier. The warm tier is an LRU bounded to
//! `cache_max_entries` with a per-entry TTL; the single mutex guards O(1)
//! critical sections only. Cache failures never propagate; they degrade to
//! a miss.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::market::timeframe::Timeframe;
use crate::infrastructure::cache::SharedCacheClient;

/// Cache key format: `symbol:timeframe:window_label`.
pub fn cache_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("{}:{}:{}", symbol, timeframe, timeframe.window_label())
}

struct WarmEntry {
    payload: Arc<Vec<u8>>,
    inserted_at: Instant,
    seq: u64,
}

/// In-process LRU with TTL. Recency is tracked with a monotonic sequence
/// number; the order queue may hold stale entries which are skipped at
/// eviction time, keeping hits O(1).
struct WarmTier {
    entries: HashMap<String, WarmEntry>,
    order: VecDeque<(u64, String)>,
    next_seq: u64,
    capacity: usize,
    ttl: Duration,
}

impl WarmTier {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn bump(&mut self, key: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.to_string()));
        seq
    }

    fn get(&mut self, key: &str) -> Option<Arc<Vec<u8>>> {
        let fresh = self.entries.get(key)?.inserted_at.elapsed() < self.ttl;
        if !fresh {
            // Expired; drop eagerly so len() reflects live entries.
            self.entries.remove(key);
            return None;
        }
        let seq = self.bump(key);
        let entry = self.entries.get_mut(key)?;
        entry.seq = seq;
        Some(Arc::clone(&entry.payload))
    }

    fn put(&mut self, key: String, payload: Vec<u8>) {
        let seq = self.bump(&key);
        self.entries.insert(
            key,
            WarmEntry {
                payload: Arc::new(payload),
                inserted_at: Instant::now(),
                seq,
            },
        );
        while self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    fn evict_lru(&mut self) {
        while let Some((seq, key)) = self.order.pop_front() {
            // Skip stale order records left behind by MRU bumps.
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                debug!("Warm cache: evicted {}", key);
                return;
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct MarketDataCache {
    warm: Mutex<WarmTier>,
    hot: Option<SharedCacheClient>,
    ttl: Duration,
}

impl MarketDataCache {
    pub fn new(max_entries: usize, ttl: Duration, hot: Option<SharedCacheClient>) -> Self {
        Self {
            warm: Mutex::new(WarmTier::new(max_entries, ttl)),
            hot,
            ttl,
        }
    }

    /// Looks the key up, hot tier first. `bypass` forces a miss without
    /// touching either tier; force-refresh paths use it.
    pub async fn get(&self, key: &str, bypass: bool) -> Option<Vec<u8>> {
        if bypass {
            return None;
        }

        if let Some(hot) = &self.hot
            && let Some(envelope) = hot.get(key).await
            && let Some(payload) = decode_hot_envelope(&envelope, self.ttl)
        {
            return Some(payload);
        }

        self.warm
            .lock()
            .expect("warm cache lock")
            .get(key)
            .map(|arc| arc.as_ref().clone())
    }

    /// Writes populate both tiers.
    pub async fn put(&self, key: &str, payload: Vec<u8>) {
        if let Some(hot) = &self.hot {
            hot.put(key, &encode_hot_envelope(&payload)).await;
        }
        self.warm
            .lock()
            .expect("warm cache lock")
            .put(key.to_string(), payload);
    }

    pub async fn invalidate(&self, key: &str) {
        if let Some(hot) = &self.hot {
            hot.invalidate(key).await;
        }
        let mut warm = self.warm.lock().expect("warm cache lock");
        warm.entries.remove(key);
    }

    pub async fn invalidate_all(&self) {
        if let Some(hot) = &self.hot {
            hot.invalidate_all().await;
        }
        let mut warm = self.warm.lock().expect("warm cache lock");
        warm.entries.clear();
        warm.order.clear();
    }

    pub fn warm_len(&self) -> usize {
        self.warm.lock().expect("warm cache lock").len()
    }

    /// Hot-tier reachability for the health endpoint. `None` when no hot
    /// tier is configured.
    pub fn hot_healthy(&self) -> Option<bool> {
        self.hot.as_ref().map(|h| h.healthy())
    }
}

/// The hot sidecar stores opaque bytes, so the TTL is enforced client-side:
/// payloads are prefixed with their insertion epoch (8 bytes, big-endian).
fn encode_hot_envelope(payload: &[u8]) -> Vec<u8> {
    let epoch = chrono::Utc::now().timestamp();
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&epoch.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_hot_envelope(envelope: &[u8], ttl: Duration) -> Option<Vec<u8>> {
    if envelope.len() < 8 {
        return None;
    }
    let inserted_at = i64::from_be_bytes(envelope[..8].try_into().ok()?);
    let age = chrono::Utc::now().timestamp().saturating_sub(inserted_at);
    if age < 0 || age as u64 >= ttl.as_secs().max(1) {
        return None;
    }
    Some(envelope[8..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl_ms: u64) -> MarketDataCache {
        MarketDataCache::new(capacity, Duration::from_millis(ttl_ms), None)
    }

    #[tokio::test]
    async fn test_get_within_ttl_returns_put_value() {
        let c = cache(16, 10_000);
        c.put("INFY.NS:5m:60d", b"payload".to_vec()).await;
        assert_eq!(c.get("INFY.NS:5m:60d", false).await, Some(b"payload".to_vec()));
        assert_eq!(c.warm_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let c = cache(16, 10);
        c.put("k", b"v".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.get("k", false).await, None);
    }

    #[tokio::test]
    async fn test_bypass_skips_tiers() {
        let c = cache(16, 10_000);
        c.put("k", b"v".to_vec()).await;
        assert_eq!(c.get("k", true).await, None);
        // The entry itself is untouched.
        assert_eq!(c.get("k", false).await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_invalidate_all_clears() {
        let c = cache(16, 10_000);
        c.put("a", b"1".to_vec()).await;
        c.put("b", b"2".to_vec()).await;
        c.invalidate_all().await;
        assert_eq!(c.get("a", false).await, None);
        assert_eq!(c.warm_len(), 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_prefers_least_recent() {
        let c = cache(2, 10_000);
        c.put("a", b"1".to_vec()).await;
        c.put("b", b"2".to_vec()).await;
        // Touch "a" so "b" becomes least recently used.
        assert!(c.get("a", false).await.is_some());
        c.put("c", b"3".to_vec()).await;
        assert_eq!(c.warm_len(), 2);
        assert!(c.get("a", false).await.is_some());
        assert_eq!(c.get("b", false).await, None);
        assert!(c.get("c", false).await.is_some());
    }

    #[test]
    fn test_hot_envelope_round_trip_and_expiry() {
        let envelope = encode_hot_envelope(b"candles");
        assert_eq!(
            decode_hot_envelope(&envelope, Duration::from_secs(30)),
            Some(b"candles".to_vec())
        );

        // A stale envelope decodes to a miss.
        let epoch = chrono::Utc::now().timestamp() - 120;
        let mut stale = epoch.to_be_bytes().to_vec();
        stale.extend_from_slice(b"candles");
        assert_eq!(decode_hot_envelope(&stale, Duration::from_secs(30)), None);

        // Truncated garbage is a miss, never a panic.
        assert_eq!(decode_hot_envelope(&[1, 2, 3], Duration::from_secs(30)), None);
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            cache_key("INFY.NS", Timeframe::FiveMin),
            "INFY.NS:5m:60d"
        );
        assert_eq!(cache_key("TCS.NS", Timeframe::OneDay), "TCS.NS:1d:2y");
    }
}
