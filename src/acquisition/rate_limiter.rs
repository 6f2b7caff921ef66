//! Search rate limiting for the P2P network.
//!
//! Every network search takes a token first. Acquisitions are logged with
//! their timestamps so the limit holds for any rolling window, not only for
//! aligned refill periods.

use crate::config::RateLimitSettings;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{AcquisitionError, AcquisitionResult};

/// Snapshot of the limiter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    /// Searches still allowed in the current window
    pub tokens: usize,
    pub max_tokens: usize,
    pub window_ms: u64,
    /// When the oldest acquisition in the window was taken, if any
    pub last_refill_at: Option<Instant>,
}

/// Sliding-log limiter shared by all P2P searches.
pub struct SearchRateLimiter {
    acquisitions: Mutex<VecDeque<Instant>>,
    max_tokens: usize,
    window: Duration,
}

impl SearchRateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            acquisitions: Mutex::new(VecDeque::new()),
            max_tokens: settings.max_searches.max(1),
            window: Duration::from_secs(settings.window_secs),
        }
    }

    fn prune(acquisitions: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = acquisitions.front() {
            if now.duration_since(*front) >= window {
                acquisitions.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a token if one is available right now.
    /// Returns the time until the next token frees up otherwise.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let mut acquisitions = self.acquisitions.lock().await;
        let now = Instant::now();
        Self::prune(&mut acquisitions, now, self.window);

        if acquisitions.len() < self.max_tokens {
            acquisitions.push_back(now);
            return Ok(());
        }
        let oldest = acquisitions.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire().await {
                Ok(()) => return,
                Err(wait) => {
                    debug!("P2P search rate limited, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire), giving up when `cancel` fires.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> AcquisitionResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquisitionError::RateLimited),
            _ = self.acquire() => Ok(()),
        }
    }

    pub async fn budget(&self) -> RateBudget {
        let mut acquisitions = self.acquisitions.lock().await;
        let now = Instant::now();
        Self::prune(&mut acquisitions, now, self.window);
        RateBudget {
            tokens: self.max_tokens - acquisitions.len(),
            max_tokens: self.max_tokens,
            window_ms: self.window.as_millis() as u64,
            last_refill_at: acquisitions.front().copied(),
        }
    }
}
