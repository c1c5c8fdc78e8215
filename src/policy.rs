//! Call-site policies for external collaborators: timeout, rate limit, retry.
//!
//! Only network calls go through here. Local computation is never retried.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::provider::ProviderError;

/// Capped exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the sleep after failed attempt `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered sleep in `[0, ceiling(attempt)]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every call to a rate-limited provider.
///
/// Constructed once at startup and handed around behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    granted: AtomicU64,
}

impl RateLimiter {
    /// `per_minute` permits, bursting up to the same amount. Zero disables limiting.
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: if per_minute == 0 {
                f64::INFINITY
            } else {
                capacity / 60.0
            },
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            granted: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::per_minute(0)
    }

    /// Permits handed out so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Take a permit now, or report how long until one is available.
    fn try_acquire(&self) -> Result<(), Duration> {
        if self.refill_per_sec.is_infinite() {
            self.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.granted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    debug!("Rate limiter: waiting {:?} for a permit", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Timeout + rate limit + retry, applied around one collaborator call.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub limiter: Arc<RateLimiter>,
}

impl CallPolicy {
    pub fn new(timeout: Duration, retry: RetryPolicy, limiter: Arc<RateLimiter>) -> Self {
        Self {
            timeout,
            retry,
            limiter,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn call<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.limiter.acquire().await;

            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider.to_string(),
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        provider,
                        attempt + 1,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(max_attempts: u32) -> CallPolicy {
        CallPolicy::new(
            Duration::from_millis(200),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            Arc::new(RateLimiter::unlimited()),
        )
    }

    #[test]
    fn test_ceiling_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.ceiling(2), Duration::from_millis(400));
        assert_eq!(policy.ceiling(9), Duration::from_millis(1000));
        for attempt in 0..10 {
            assert!(policy.delay_for(attempt) <= policy.ceiling(attempt));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(4)
            .call("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::RateLimited {
                            provider: "flaky".into(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .call("bad", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Invalid {
                        provider: "bad".into(),
                        detail: "401".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Invalid { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_capped() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .call("down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Transport {
                        provider: "down".into(),
                        detail: "refused".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_provider_timeout() {
        let policy = CallPolicy::new(
            Duration::from_millis(10),
            RetryPolicy::no_retry(),
            Arc::new(RateLimiter::unlimited()),
        );
        let result: Result<(), _> = policy
            .call("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_rate_limiter_counts_permits() {
        let limiter = RateLimiter::per_minute(600);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.granted(), 5);
    }
}
