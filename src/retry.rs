use rand::Rng;
use std::time::Duration;

/// Default delay between a connection closing and the next attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Configuration for reconnect timing
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry after a close
    pub initial_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure (1.0 = fixed delay)
    pub multiplier: f64,
    /// Whether to lengthen delays by up to 20% at random
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay grows by `multiplier` for each consecutive failed attempt
    pub fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            multiplier: multiplier.max(1.0),
            jitter: true,
        }
    }

    /// Delay to wait before the next attempt.
    ///
    /// `consecutive_failures` counts closes since the last successful open; 0
    /// means the connection was open and then dropped. The result is never
    /// shorter than `initial_delay`.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.min(32) as i32;
        let base = if self.multiplier > 1.0 {
            // Cap in f64 first so large exponents cannot overflow Duration
            let secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
                .min(self.max_delay.as_secs_f64());
            Duration::from_secs_f64(secs).max(self.initial_delay)
        } else {
            self.initial_delay
        };

        if self.jitter {
            // Only ever lengthen: the configured delay is a floor
            let jitter_range = base.as_millis() as u64 / 5;
            if jitter_range > 0 {
                let extra = rand::thread_rng().gen_range(0..=jitter_range);
                return base + Duration::from_millis(extra);
            }
        }

        base
    }
}
