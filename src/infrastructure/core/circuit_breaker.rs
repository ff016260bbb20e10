use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Breaker state for one upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through.
    Closed,
    /// Consecutive failures tripped the breaker; calls fail fast until the
    /// cooldown elapses, then a single probe call is let through.
    Open,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Fail-fast guard around a flaky upstream.
///
/// After `failure_threshold` consecutive failures the breaker opens for
/// `cooldown`; the first call after the cooldown acts as the probe — success
/// closes the breaker, failure re-opens it for another cooldown.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: usize,
    cooldown: Duration,
    name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("Circuit breaker [{name}] is open; retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold,
            cooldown,
            name: name.into(),
        }
    }

    /// Runs `f` under breaker protection.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BreakerState::Open {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed < self.cooldown {
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_in: self.cooldown - elapsed,
                    });
                }
                // Cooldown elapsed: let this call through as the probe.
                info!("CircuitBreaker [{}]: cooldown elapsed, probing", self.name);
            }
        }

        match f.await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                if inner.state == BreakerState::Open {
                    info!("CircuitBreaker [{}]: probe succeeded, closing", self.name);
                }
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                Ok(value)
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.consecutive_failures += 1;
                if inner.state == BreakerState::Open
                    || inner.consecutive_failures >= self.failure_threshold
                {
                    if inner.state != BreakerState::Open {
                        warn!(
                            "CircuitBreaker [{}]: opening after {} consecutive failures",
                            self.name, inner.consecutive_failures
                        );
                    }
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), &str>("boom") }).await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(cb.state().await, BreakerState::Open);

        // Fails fast while the cooldown runs.
        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_probe_closes_after_cooldown() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(50));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("boom") }).await;
        }
        assert_eq!(cb.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(50));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { Err::<(), &str>("still down") }).await;
        assert_eq!(cb.state().await, BreakerState::Open);
    }
}
