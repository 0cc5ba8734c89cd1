//! Per-worker sliding-window rate limiter.
//!
//! At most `max` acquisitions per rolling 60-second window. When the window
//! is full the caller sleeps until the oldest acquisition ages out, plus a
//! small margin, and the window starts over. Each worker owns its limiter,
//! so the global ceiling is `max × workers`.

use crate::state::{cancellable_sleep, Cancelled};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Extra wait on top of the computed one, absorbing clock skew with the
/// remote quota counter.
pub const SAFETY_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    /// `max` is clamped to at least 1.
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            max,
            timestamps: VecDeque::with_capacity(max),
        }
    }

    /// Acquisitions still inside the window.
    pub fn in_window(&mut self) -> usize {
        self.evict(Instant::now());
        self.timestamps.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a slot, sleeping if the window is full.
    ///
    /// Returns how long the caller waited. A stop signal during the wait
    /// returns `Err(Cancelled)` without registering an acquisition.
    pub async fn acquire(&mut self, stop: &CancellationToken) -> Result<Duration, Cancelled> {
        let now = Instant::now();
        self.evict(now);

        let mut waited = Duration::ZERO;
        if self.timestamps.len() >= self.max {
            if let Some(&oldest) = self.timestamps.front() {
                waited = WINDOW.saturating_sub(now.duration_since(oldest)) + SAFETY_MARGIN;
                debug!("Rate limit reached, waiting {:.1}s", waited.as_secs_f64());
                cancellable_sleep(stop, waited).await?;
            }
            self.timestamps.clear();
        }

        self.timestamps.push_back(Instant::now());
        Ok(waited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn under_the_cap_never_waits() {
        let stop = CancellationToken::new();
        let mut limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert_eq!(limiter.acquire(&stop).await, Ok(Duration::ZERO));
        }
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn over_the_cap_waits_for_the_window() {
        let stop = CancellationToken::new();
        let mut limiter = RateLimiter::new(2);
        limiter.acquire(&stop).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire(&stop).await.unwrap();

        let start = Instant::now();
        let waited = limiter.acquire(&stop).await.unwrap();
        assert_eq!(waited, Duration::from_secs(50) + SAFETY_MARGIN);
        assert!(start.elapsed() >= waited);
        assert_eq!(limiter.in_window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spread_out_calls_never_wait() {
        let stop = CancellationToken::new();
        let mut limiter = RateLimiter::new(1);
        for _ in 0..4 {
            assert_eq!(limiter.acquire(&stop).await, Ok(Duration::ZERO));
            tokio::time::advance(WINDOW + Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_wait() {
        let stop = CancellationToken::new();
        let mut limiter = RateLimiter::new(1);
        limiter.acquire(&stop).await.unwrap();
        stop.cancel();
        assert_eq!(limiter.acquire(&stop).await, Err(Cancelled));
        assert_eq!(limiter.in_window(), 1);
    }
}
