//! Hot-tier cache client.
//!
//! Talks to an optional shared key-value sidecar over HTTP
//! (`GET/PUT/DELETE /kv/{key}`, `DELETE /kv`). The hot tier is best-effort:
//! an unreachable endpoint degrades every operation to a miss/no-op, and
//! reconnection is retried lazily with exponential backoff capped at 60s.
//! Nothing here ever returns an error to the caller.

use reqwest_middleware::ClientWithMiddleware;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::infrastructure::core::http_client_factory::build_http_client;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

struct BackoffState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

pub struct SharedCacheClient {
    client: ClientWithMiddleware,
    base_url: String,
    backoff: Mutex<BackoffState>,
}

impl SharedCacheClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: build_http_client(Duration::from_secs(2)),
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff: Mutex::new(BackoffState {
                consecutive_failures: 0,
                blocked_until: None,
            }),
        }
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, key)
    }

    /// True while a previous failure still blocks attempts.
    fn in_backoff(&self) -> bool {
        let state = self.backoff.lock().expect("backoff lock");
        matches!(state.blocked_until, Some(until) if Instant::now() < until)
    }

    fn record_success(&self) {
        let mut state = self.backoff.lock().expect("backoff lock");
        state.consecutive_failures = 0;
        state.blocked_until = None;
    }

    fn record_failure(&self) {
        let mut state = self.backoff.lock().expect("backoff lock");
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let delay = BACKOFF_BASE
            .saturating_mul(2u32.saturating_pow(state.consecutive_failures.min(6)))
            .min(BACKOFF_CAP);
        state.blocked_until = Some(Instant::now() + delay);
        warn!(
            "SharedCacheClient: hot tier unreachable ({} consecutive failures), backing off {:?}",
            state.consecutive_failures, delay
        );
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if self.in_backoff() {
            return None;
        }
        match self.client.get(self.key_url(key)).send().await {
            Ok(response) if response.status().is_success() => {
                self.record_success();
                response.bytes().await.ok().map(|b| b.to_vec())
            }
            Ok(response) => {
                // 404 means a clean miss, not an outage.
                if response.status() != reqwest::StatusCode::NOT_FOUND {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                None
            }
            Err(e) => {
                debug!("SharedCacheClient: get {} failed: {}", key, e);
                self.record_failure();
                None
            }
        }
    }

    pub async fn put(&self, key: &str, payload: &[u8]) {
        if self.in_backoff() {
            return;
        }
        match self
            .client
            .put(self.key_url(key))
            .body(payload.to_vec())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => self.record_success(),
            Ok(_) | Err(_) => self.record_failure(),
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if self.in_backoff() {
            return;
        }
        if self.client.delete(self.key_url(key)).send().await.is_err() {
            self.record_failure();
        }
    }

    pub async fn invalidate_all(&self) {
        if self.in_backoff() {
            return;
        }
        let url = format!("{}/kv", self.base_url);
        if self.client.delete(url).send().await.is_err() {
            self.record_failure();
        }
    }

    /// Reachability signal for the health endpoint.
    pub fn healthy(&self) -> bool {
        !self.in_backoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades_to_miss() {
        // Nothing listens on this port; the get must return None, not error.
        let client = SharedCacheClient::new("http://127.0.0.1:59999".to_string());
        assert_eq!(client.get("INFY.NS:5m:60d").await, None);
        // The failure puts the client into backoff, so the next call is a
        // fast miss without a network attempt.
        assert!(client.in_backoff());
        assert_eq!(client.get("INFY.NS:5m:60d").await, None);
        assert!(!client.healthy());
    }

    #[test]
    fn test_backoff_caps_at_sixty_seconds() {
        let client = SharedCacheClient::new("http://127.0.0.1:59999".to_string());
        for _ in 0..20 {
            client.record_failure();
        }
        let state = client.backoff.lock().unwrap();
        let until = state.blocked_until.unwrap();
        assert!(until.duration_since(Instant::now()) <= BACKOFF_CAP);
    }
}
