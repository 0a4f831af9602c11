//! Outbound rate limiter for exchange transport calls.
//!
//! Tracks a rolling window of request count. Once the ceiling is hit, the
//! calling flow blocks for a fixed cool-down and the counter resets. This is
//! admission control, not error handling: callers on the reconciliation and
//! strategy-reaction paths simply stall, they never observe an error.

use crate::config::TradingConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per rolling window
    pub max_requests: u32,
    /// Length of the rolling window
    pub window: Duration,
    /// Forced pause once the ceiling is hit
    pub cooldown: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 50,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl From<&TradingConfig> for RateLimiterConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            max_requests: config.rate_limit_max_requests,
            window: config.rate_limit_window,
            cooldown: config.rate_limit_cooldown,
        }
    }
}

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Admit one outbound request, blocking through the cool-down when the
    /// window ceiling has been reached.
    ///
    /// The window lock is held across the cool-down sleep, which stalls
    /// every concurrent caller until the counter resets.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        if now.duration_since(window.started_at) >= self.config.window {
            window.started_at = now;
            window.count = 0;
        }
        if window.count >= self.config.max_requests {
            warn!(
                max_requests = self.config.max_requests,
                cooldown_secs = self.config.cooldown.as_secs(),
                "outbound request ceiling hit, cooling down"
            );
            tokio::time::sleep(self.config.cooldown).await;
            window.started_at = Instant::now();
            window.count = 0;
        }
        window.count += 1;
    }

    /// Requests admitted in the current window.
    pub async fn current_count(&self) -> u32 {
        self.window.lock().await.count
    }
}
