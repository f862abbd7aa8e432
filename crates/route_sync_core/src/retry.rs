use std::thread;
use std::time::Duration;

use crate::remote::RemoteError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for remote calls.
///
/// Only throttling and transient failures are retried. Conflicts, validation
/// and permission errors are returned on the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn run<T>(
        &self,
        operation: &str,
        call: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.run_when(operation, RemoteError::is_retryable, call)
    }

    /// Like [`RetryPolicy::run`], retrying only errors accepted by `should_retry`.
    pub fn run_when<T>(
        &self,
        operation: &str,
        should_retry: impl Fn(&RemoteError) -> bool,
        mut call: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(error) if should_retry(&error) && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        component = "retry",
                        event = "remote_call_retry",
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::remote::RemoteErrorKind;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn retries_throttled_calls_until_success() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run("get_resources", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::new(RemoteErrorKind::Throttled, "get_resources", "rate exceeded"))
            } else {
                Ok("page")
            }
        });

        assert_eq!(result, Ok("page"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), RemoteError> = RetryPolicy::immediate(4).run("put_method", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::new(RemoteErrorKind::Transient, "put_method", "connection reset"))
        });

        assert_eq!(result.expect_err("should fail").kind, RemoteErrorKind::Transient);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn does_not_retry_conflicts() {
        let calls = Cell::new(0);
        let result: Result<(), RemoteError> = RetryPolicy::immediate(5).run("create_resource", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::new(RemoteErrorKind::Conflict, "create_resource", "exists"))
        });

        assert!(result.expect_err("should fail").is_conflict());
        assert_eq!(calls.get(), 1);
    }
}
