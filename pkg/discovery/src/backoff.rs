//! Exponential backoff tracker for retrying coordination-service calls
//! (§4.C "transient coordination errors are retried with bounded
//! exponential backoff"). Adapted from the connection retry pattern used
//! throughout the RPC client.

use std::time::Duration;

use rand::Rng;

#[derive(Clone)]
pub struct BackoffOptions {
    pub base_duration: Duration,
    pub max_duration: Duration,
    pub jitter_duration: Duration,
    pub max_num_attempts: usize,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_duration: Duration::from_millis(200),
            max_duration: Duration::from_secs(10),
            jitter_duration: Duration::from_millis(100),
            max_num_attempts: 0,
        }
    }
}

pub struct Backoff {
    options: BackoffOptions,
    attempt: usize,
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self { options, attempt: 0 }
    }

    /// `min(initialDelay * 2^attempt, maxDelay)` with jitter (§4.F retry).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.options.max_num_attempts != 0 && self.attempt >= self.options.max_num_attempts {
            return None;
        }

        let exp = 2u32.saturating_pow(self.attempt as u32);
        let scaled = self.options.base_duration.saturating_mul(exp);
        let capped = std::cmp::min(scaled, self.options.max_duration);

        let jitter_millis = self.options.jitter_duration.as_millis() as u64;
        let jitter = if jitter_millis == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_millis))
        };

        self.attempt += 1;
        Some(capped + jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

/// `min(initialDelay * 2^attempt, maxDelay)`, no jitter: used by the RPC
/// proxy's synchronous retry path where determinism in tests matters more
/// than thundering-herd avoidance across a handful of client-local retries.
pub fn retry_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let scaled = initial.saturating_mul(2u32.saturating_pow(attempt));
    std::cmp::min(scaled, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_caps_at_max_duration() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(100);
        assert_eq!(retry_delay(base, max, 0), Duration::from_millis(10));
        assert_eq!(retry_delay(base, max, 1), Duration::from_millis(20));
        assert_eq!(retry_delay(base, max, 10), max);
    }

    #[test]
    fn backoff_stops_after_max_attempts() {
        let mut backoff = Backoff::new(BackoffOptions {
            max_num_attempts: 2,
            ..Default::default()
        });
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
