//! Counter store backends for the sliding-window limiter
//!
//! - Redis for shared, multi-instance deployments
//! - In-memory for development and tests

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::errors::Result;

/// Hits currently inside one key's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the window, including this one if it was recorded
    pub count: u32,
    /// Timestamp (ms) of the oldest hit still in the window
    pub oldest_ms: Option<u64>,
    /// Whether this hit was recorded (false once the ceiling is reached)
    pub recorded: bool,
}

/// Shared counter store. Implementations must drop expired hits, compare
/// against `limit` and record the new hit as one atomic step.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn record_hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowCount>;
}

/// Hits for one key and the time the newest of them leaves the window
#[derive(Debug, Default)]
struct SlidingLog {
    hits: VecDeque<u64>,
    expires_at: u64,
}

#[derive(Debug, Default)]
struct SlidingLogs {
    logs: HashMap<String, SlidingLog>,
    last_sweep_ms: u64,
}

impl SlidingLogs {
    fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| log.expires_at > now_ms);
        self.last_sweep_ms = now_ms;
        before - self.logs.len()
    }
}

/// In-memory sliding log. Expired keys are swept at most once per window,
/// on the first write after the window has passed.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    state: Arc<RwLock<SlidingLogs>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.state.read().await.logs.len()
    }

    /// Drop every key whose hits have all left their window
    pub async fn cleanup(&self, now_ms: u64) {
        let removed = self.state.write().await.sweep(now_ms);
        debug!(removed, "Completed rate limit storage cleanup");
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowCount> {
        let window_ms = window.as_millis() as u64;
        let mut state = self.state.write().await;

        if now_ms >= state.last_sweep_ms + window_ms {
            state.sweep(now_ms);
        }

        let log = state.logs.entry(key.to_string()).or_default();

        while let Some(&oldest) = log.hits.front() {
            if oldest + window_ms <= now_ms {
                log.hits.pop_front();
            } else {
                break;
            }
        }

        let recorded = (log.hits.len() as u32) < limit;
        if recorded {
            log.hits.push_back(now_ms);
        }
        if let Some(&newest) = log.hits.back() {
            log.expires_at = newest + window_ms;
        }

        let result = WindowCount {
            count: log.hits.len() as u32,
            oldest_ms: log.hits.front().copied(),
            recorded,
        };

        if log.hits.is_empty() {
            state.logs.remove(key);
        }

        Ok(result)
    }
}

const SLIDING_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local recorded = 0
if count < limit then
  redis.call('ZADD', key, now, member)
  count = count + 1
  recorded = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {count, recorded, oldest_ms}
"#;

/// Redis sorted-set sliding log, evaluated by a Lua script
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the connection
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        debug!("Connected to Redis for rate limiting");

        Ok(Self {
            connection_manager,
            script: Script::new(SLIDING_LOG_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowCount> {
        let mut conn = self.connection_manager.clone();
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window.as_millis() as u64)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        let count = reply.first().copied().unwrap_or(0).max(0) as u32;
        let recorded = reply.get(1).copied().unwrap_or(0) == 1;
        let oldest_ms = reply
            .get(2)
            .copied()
            .filter(|oldest| *oldest >= 0)
            .map(|oldest| oldest as u64);

        Ok(WindowCount {
            count,
            oldest_ms,
            recorded,
        })
    }
}
