//! Drift-free emission pacing

use std::time::Duration;
use tokio::time::Instant;

/// Hands out deadlines on a fixed grid `start + k * interval`
///
/// Each deadline is the previous one plus the interval, never "now" plus the
/// interval, so lateness in one iteration does not shift the ones after it.
/// A consumer that falls more than one interval behind skips the ticks it
/// missed instead of bursting through them, and stays on the same grid.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    next: Instant,
}

impl RateLimiter {
    /// Creates a limiter whose first deadline is now
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    /// Creates a limiter whose first deadline is `start`
    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next: start,
        }
    }

    /// Creates a limiter for `fps` frames per second
    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / fps.max(1) as f64))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline before which the next emission must not happen
    pub fn next_allowed_time(&mut self) -> Instant {
        self.next_allowed_time_at(Instant::now())
    }

    /// Same as [`RateLimiter::next_allowed_time`] with an explicit clock
    pub fn next_allowed_time_at(&mut self, now: Instant) -> Instant {
        let interval_nanos = self.interval.as_nanos();
        if interval_nanos == 0 {
            return now;
        }

        let mut deadline = self.next;

        if now > deadline + self.interval {
            let missed = (now - deadline).as_nanos() / interval_nanos;
            let skip = interval_nanos * missed;
            deadline += Duration::from_nanos(u64::try_from(skip).unwrap_or(u64::MAX));
        }

        self.next = deadline + self.interval;
        deadline
    }
}
