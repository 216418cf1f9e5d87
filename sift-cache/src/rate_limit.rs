use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_MAX_REQUESTS: u32 = 50;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded, retry in {retry_after:?}")]
pub struct RateLimited {
    pub reset_at: Instant,
    pub retry_after: Duration,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `user_id`, or reject it until the window resets.
    async fn check(&self, user_id: &str) -> Result<(), RateLimited>;
    /// Drop windows that have elapsed; returns how many were removed.
    async fn sweep(&self) -> usize;
}

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter per user.
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub async fn tracked_users(&self) -> usize {
        self.windows.lock().await.len()
    }
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(&self, user_id: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry(user_id.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count >= self.max_requests {
            let retry_after = window.reset_at.duration_since(now);
            warn!(user_id, ?retry_after, "rate limit exceeded");
            return Err(RateLimited {
                reset_at: window.reset_at,
                retry_after,
            });
        }
        window.count += 1;
        Ok(())
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now < w.reset_at);
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "swept elapsed rate limit windows");
        }
        removed
    }
}

/// Run `limiter.sweep()` every `every` until the handle is aborted.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.sweep().await;
        }
    })
}
