//! Retry logic with exponential backoff and jitter.

use std::time::Duration;

use crate::http_client::{HttpError, HttpMethod};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(120),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// Configuration for the automatic retry mechanism.
///
/// The defaults match what the platform tolerates: five retries, a 0.5 s
/// base doubling per attempt, and retries on throttling and gateway errors
/// for every method the client sends.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// HTTP status codes that trigger a retry.
    pub retry_on_status: Vec<u16>,
    /// Whether to retry on request timeouts.
    pub retry_on_timeout: bool,
    /// Whether to retry on connection errors.
    pub retry_on_connect: bool,
    /// Methods that may be retried.
    pub retry_methods: Vec<HttpMethod>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            backoff: Backoff::default(),
            retry_on_status: vec![429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
            retry_methods: vec![
                HttpMethod::Get,
                HttpMethod::Post,
                HttpMethod::Put,
                HttpMethod::Patch,
                HttpMethod::Delete,
            ],
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with fixed backoff.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    pub fn should_retry_method(&self, method: HttpMethod) -> bool {
        self.retry_methods.contains(&method)
    }

    pub fn should_retry_error(&self, error: &HttpError) -> bool {
        (error.is_timeout() && self.retry_on_timeout)
            || (error.is_connect() && self.retry_on_connect)
    }

    /// Whether another attempt is allowed after `attempt` retries.
    pub fn allows_retry(&self, method: HttpMethod, attempt: u32) -> bool {
        self.enabled && attempt < self.max_retries && self.should_retry_method(method)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_default_backoff_doubles_from_half_second() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(20), Duration::from_secs(120)); // capped
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for attempt in 0..5 {
                let delay_ms = backoff.delay(attempt).as_millis() as f64;
                let expected_capped = (100.0 * 2_f64.powi(attempt as i32)).min(1000.0);

                assert!(delay_ms >= expected_capped * 0.49, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected_capped * 1.51, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();

        assert!(config.enabled);
        assert_eq!(config.max_retries, 5);
        for status in [429, 500, 502, 503, 504] {
            assert!(config.should_retry_status(status), "status {status}");
        }
        assert!(!config.should_retry_status(400));
        assert!(!config.should_retry_status(404));
        assert!(!config.should_retry_status(408));
        assert!(config.should_retry_method(HttpMethod::Post));
        assert!(config.should_retry_method(HttpMethod::Patch));
    }

    #[test]
    fn test_error_classification() {
        let config = RetryConfig::default();

        assert!(config.should_retry_error(&HttpError::timeout("slow")));
        assert!(config.should_retry_error(&HttpError::connect("refused")));
        assert!(!config.should_retry_error(&HttpError::new("bad body")));
    }

    #[test]
    fn test_allows_retry_stops_at_max() {
        let config = RetryConfig::fixed(Duration::ZERO, 2);

        assert!(config.allows_retry(HttpMethod::Get, 0));
        assert!(config.allows_retry(HttpMethod::Get, 1));
        assert!(!config.allows_retry(HttpMethod::Get, 2));
    }

    #[test]
    fn test_retry_config_no_retry() {
        let config = RetryConfig::no_retry();

        assert!(!config.enabled);
        assert!(!config.allows_retry(HttpMethod::Get, 0));
    }
}
