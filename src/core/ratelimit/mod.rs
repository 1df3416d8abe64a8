//! Sliding-window rate limiting
//!
//! Four independent pools share one counter store. Each pool has its own
//! ceiling per rolling window. When the store cannot be reached the limiter
//! fails open and lets the request through.

pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::GatewayConfig;
use crate::core::errors::{GatewayError, Result};

pub use store::{CounterStore, InMemoryCounterStore, RedisCounterStore, WindowCount};

/// Quota pool a request is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    General,
    Translation,
    Practice,
    Public,
}

impl Pool {
    pub const ALL: [Pool; 4] = [Pool::General, Pool::Translation, Pool::Practice, Pool::Public];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::General => "general",
            Pool::Translation => "translation",
            Pool::Practice => "practice",
            Pool::Public => "public",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requests allowed per window, per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    pub general: u32,
    pub translation: u32,
    pub practice: u32,
    pub public: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            general: 30,
            translation: 10,
            practice: 5,
            public: 20,
        }
    }
}

impl PoolLimits {
    pub fn get(&self, pool: Pool) -> u32 {
        match pool {
            Pool::General => self.general,
            Pool::Translation => self.translation,
            Pool::Practice => self.practice,
            Pool::Public => self.public,
        }
    }
}

/// Outcome of a limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (ms) at which the oldest hit leaves the window
    pub reset_at: u64,
}

impl RateLimitDecision {
    /// Seconds until a slot frees up, rounded up
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Sliding-window limiter over an injected counter store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limits: PoolLimits,
    window: Duration,
    prefix: String,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        limits: PoolLimits,
        window: Duration,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            limits,
            window,
            prefix: prefix.into(),
        }
    }

    /// Build a limiter from gateway configuration
    pub fn from_config(store: Arc<dyn CounterStore>, config: &GatewayConfig) -> Self {
        Self::new(
            store,
            config.limits,
            config.window(),
            config.rate_limit_prefix.clone(),
        )
    }

    /// Check and charge one request for `identifier` against `pool`
    pub async fn check(&self, pool: Pool, identifier: &str) -> RateLimitDecision {
        self.check_at(pool, identifier, now_ms()).await
    }

    /// Same as [`check`](Self::check) at an explicit time
    pub async fn check_at(&self, pool: Pool, identifier: &str, now_ms: u64) -> RateLimitDecision {
        let limit = self.limits.get(pool);
        let window_ms = self.window.as_millis() as u64;
        let key = self.key(pool, identifier);

        match self.store.record_hit(&key, limit, self.window, now_ms).await {
            Ok(count) => {
                let decision = RateLimitDecision {
                    allowed: count.recorded,
                    limit,
                    remaining: limit.saturating_sub(count.count),
                    reset_at: count.oldest_ms.unwrap_or(now_ms) + window_ms,
                };

                debug!(
                    pool = %pool,
                    identifier = %identifier,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit checked"
                );

                decision
            }
            Err(e) => {
                warn!(pool = %pool, "Rate limit check failed, allowing request: {}", e);
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at: now_ms,
                }
            }
        }
    }

    /// Check a request and turn a rejection into [`GatewayError::QuotaExceeded`]
    pub async fn enforce(&self, pool: Pool, identifier: &str) -> Result<RateLimitDecision> {
        let decision = self.check(pool, identifier).await;

        if decision.allowed {
            Ok(decision)
        } else {
            Err(GatewayError::QuotaExceeded {
                limit: decision.limit,
                remaining: decision.remaining,
                reset_at: decision.reset_at,
            })
        }
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    fn key(&self, pool: Pool, identifier: &str) -> String {
        format!("{}/{}:{}", self.prefix, pool, identifier)
    }
}

/// Current Unix time in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            PoolLimits::default(),
            WINDOW,
            "@ratelimit",
        )
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn record_hit(&self, _: &str, _: u32, _: Duration, _: u64) -> Result<WindowCount> {
            Err(GatewayError::Storage {
                message: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_ceiling_then_rejection_for_every_pool() {
        let limiter = limiter();

        for pool in Pool::ALL {
            let ceiling = limiter.limits().get(pool);
            for n in 0..ceiling {
                let decision = limiter.check_at(pool, "user:a", 1_000 + n as u64).await;
                assert!(decision.allowed, "{pool} request {n} should pass");
                assert_eq!(decision.remaining, ceiling - n - 1);
            }

            let rejected = limiter.check_at(pool, "user:a", 2_000).await;
            assert!(!rejected.allowed, "{pool} request over ceiling should fail");
            assert_eq!(rejected.remaining, 0);
            assert_eq!(rejected.limit, ceiling);
            assert_eq!(rejected.reset_at, 1_000 + 60_000);
        }
    }

    #[tokio::test]
    async fn test_window_elapses_and_resets() {
        let limiter = limiter();

        for t in 0..5 {
            assert!(limiter.check_at(Pool::Practice, "user:b", t).await.allowed);
        }
        assert!(!limiter.check_at(Pool::Practice, "user:b", 30_000).await.allowed);

        let later = limiter.check_at(Pool::Practice, "user:b", 60_010).await;
        assert!(later.allowed);
        assert_eq!(later.remaining, 4);
    }

    #[tokio::test]
    async fn test_pools_are_independent() {
        let limiter = limiter();

        for t in 0..10 {
            assert!(limiter.check_at(Pool::Translation, "user:c", t).await.allowed);
        }
        assert!(!limiter.check_at(Pool::Translation, "user:c", 20).await.allowed);
        assert!(limiter.check_at(Pool::General, "user:c", 20).await.allowed);
    }

    #[tokio::test]
    async fn test_distinct_identifiers_do_not_interfere() {
        let limiter = limiter();

        let run = |identifier: &'static str| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let mut allowed = 0;
                for t in 0..8 {
                    if limiter.check_at(Pool::Practice, identifier, t).await.allowed {
                        allowed += 1;
                    }
                }
                allowed
            })
        };

        let (first, second) = tokio::join!(run("ip:10.0.0.1"), run("ip:10.0.0.2"));
        assert_eq!(first.unwrap(), 5);
        assert_eq!(second.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unreachable() {
        let limiter = RateLimiter::new(
            Arc::new(UnreachableStore),
            PoolLimits::default(),
            WINDOW,
            "@ratelimit",
        );

        for _ in 0..50 {
            let decision = limiter.check(Pool::Translation, "user:d").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 10);
        }
        assert!(limiter.enforce(Pool::Practice, "user:d").await.is_ok());
    }

    #[tokio::test]
    async fn test_enforce_reports_quota_exceeded() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            PoolLimits {
                practice: 1,
                ..PoolLimits::default()
            },
            WINDOW,
            "@ratelimit",
        );

        assert!(limiter.enforce(Pool::Practice, "user:e").await.is_ok());
        match limiter.enforce(Pool::Practice, "user:e").await {
            Err(GatewayError::QuotaExceeded { limit, remaining, .. }) => {
                assert_eq!(limit, 1);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: 10_500,
        };
        assert_eq!(decision.retry_after_secs(9_000), 2);
        assert_eq!(decision.retry_after_secs(11_000), 0);
    }
}
