//! Fetch pacing.
//!
//! The collection pipeline is strictly sequential, so the limiter is a
//! simple last-grant timestamp plus a randomized human-like jitter. One
//! caller, one timeline, no error path.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Jitter added on top of the configured delay, in seconds.
const JITTER_MIN_SECS: f64 = 0.5;
const JITTER_MAX_SECS: f64 = 1.5;

pub struct RateLimiter {
    delay: Duration,
    last_granted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_granted: None,
        }
    }

    /// Suspend until at least `delay` plus a jitter in [0.5, 1.5) seconds
    /// have passed since the previous turn was granted. The first turn is
    /// granted immediately.
    pub async fn await_turn(&mut self) {
        if let Some(last) = self.last_granted {
            let since_last = last.elapsed();
            if since_last < self.delay {
                let jitter =
                    JITTER_MIN_SECS + fastrand::f64() * (JITTER_MAX_SECS - JITTER_MIN_SECS);
                let wait = (self.delay - since_last) + Duration::from_secs_f64(jitter);
                debug!("Rate limiting: sleeping for {:.2}s", wait.as_secs_f64());
                sleep(wait).await;
            }
        }
        self.last_granted = Some(Instant::now());
    }
}
