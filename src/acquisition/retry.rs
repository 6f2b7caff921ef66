//! Scheduled retries for polling the indexer provider.
//!
//! Implements capped exponential backoff; a multiplier of 1.0 gives a fixed
//! delay.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry schedule with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Cap for the delay growth.
    pub max_delay: Duration,
}

impl RetrySchedule {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait after the given (zero-based) attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(5),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Run `attempt` until it yields a value, the schedule runs out, or `cancel`
/// fires. The closure receives the zero-based attempt number.
pub async fn retry_until<T, F, Fut>(
    schedule: &RetrySchedule,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for n in 0..schedule.max_attempts {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(value) = attempt(n).await {
            return Some(value);
        }
        if n + 1 == schedule.max_attempts {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(schedule.delay_after(n)) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_growth_is_capped() {
        let schedule = RetrySchedule {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(schedule.delay_after(0), Duration::from_secs(2));
        assert_eq!(schedule.delay_after(1), Duration::from_secs(4));
        assert_eq!(schedule.delay_after(2), Duration::from_secs(8));
        assert_eq!(schedule.delay_after(3), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_schedule() {
        let schedule = RetrySchedule::fixed(3, Duration::from_secs(5));
        assert_eq!(schedule.delay_after(0), Duration::from_secs(5));
        assert_eq!(schedule.delay_after(7), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_succeeds_on_later_attempt() {
        let schedule = RetrySchedule::fixed(5, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let result = retry_until(&schedule, &cancel, |n| async move {
            if n == 2 {
                Some(n)
            } else {
                None
            }
        })
        .await;
        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_gives_up() {
        let schedule = RetrySchedule::fixed(3, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Option<()> = retry_until(&schedule, &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_stops_on_cancel() {
        let schedule = RetrySchedule::fixed(100, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            canceller.cancel();
        });
        let result: Option<()> = retry_until(&schedule, &cancel, |_| async { None }).await;
        assert_eq!(result, None);
    }
}
