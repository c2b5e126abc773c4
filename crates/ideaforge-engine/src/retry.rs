use std::thread;
use std::time::Duration;

use crate::error::GenerationError;

pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(1000);

/// Exponential backoff for transient overloads. Other failures pass through
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_RETRY_BASE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// 1-based retry number.
    pub retry: usize,
    pub retries: usize,
    pub delay: Duration,
    pub reason: String,
}

impl RetryPolicy {
    pub fn new(retries: usize, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt + 1`: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn max_attempts(&self) -> usize {
        self.retries + 1
    }

    /// Run `operation`, retrying transient failures. When every attempt was
    /// transient the result is `ServiceUnavailable`.
    pub fn run<T, F, N>(&self, mut operation: F, mut on_retry: N) -> Result<T, GenerationError>
    where
        F: FnMut() -> Result<T, GenerationError>,
        N: FnMut(&RetryNotice),
    {
        let mut attempt = 0usize;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= self.retries {
                        return Err(GenerationError::ServiceUnavailable {
                            attempts: attempt + 1,
                            last: err.to_string(),
                        });
                    }
                    let delay = self.delay_for(attempt);
                    on_retry(&RetryNotice {
                        retry: attempt + 1,
                        retries: self.retries,
                        delay,
                        reason: err.to_string(),
                    });
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::error::GenerationError;

    fn instant(retries: usize) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::ZERO)
    }

    #[test]
    fn always_overloaded_is_attempted_budget_plus_one_times() {
        let mut calls = 0usize;
        let mut notices = Vec::new();
        let result: Result<(), _> = instant(3).run(
            || {
                calls += 1;
                Err(GenerationError::Overloaded("503".to_string()))
            },
            |notice| notices.push(notice.retry),
        );
        assert_eq!(calls, 4);
        assert_eq!(notices, vec![1, 2, 3]);
        assert!(matches!(
            result,
            Err(GenerationError::ServiceUnavailable { attempts: 4, .. })
        ));
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let mut calls = 0usize;
        let result: Result<(), _> = instant(3).run(
            || {
                calls += 1;
                Err(GenerationError::invalid_response("no image"))
            },
            |_| {},
        );
        assert_eq!(calls, 1);
        assert_eq!(result, Err(GenerationError::invalid_response("no image")));
    }

    #[test]
    fn recovers_after_transient_failure() {
        let mut calls = 0usize;
        let result = instant(3).run(
            || {
                calls += 1;
                if calls < 3 {
                    Err(GenerationError::Overloaded("busy".to_string()))
                } else {
                    Ok(calls)
                }
            },
            |_| {},
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn zero_budget_fails_after_one_attempt() {
        let mut calls = 0usize;
        let result: Result<(), _> = instant(0).run(
            || {
                calls += 1;
                Err(GenerationError::Overloaded("busy".to_string()))
            },
            |_| {},
        );
        assert_eq!(calls, 1);
        assert!(matches!(
            result,
            Err(GenerationError::ServiceUnavailable { attempts: 1, .. })
        ));
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }
}
