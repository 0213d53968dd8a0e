//! Bounded exponential backoff for operations that fail transiently.
//!
//! Renames and recursive deletes under the cache root race with antivirus
//! and indexer scans on some platforms; git fetches fail on flaky links.
//! Both sites wrap the operation here instead of failing on first error.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

const TARGET: &str = "gitcache::retry";

/// Attempts before the last error is propagated.
pub const DEFAULT_ATTEMPTS: u32 = 10;
/// Delay before the first retry; doubled after every failed attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Run `op` up to [`DEFAULT_ATTEMPTS`] times with exponential backoff.
///
/// Only errors for which `is_retryable` returns true are retried; anything
/// else passes through immediately. The final failure is returned as-is.
pub fn with_backoff<T, E: Display>(
    name: &str,
    op: impl FnMut() -> Result<T, E>,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E> {
    with_backoff_opts(name, DEFAULT_ATTEMPTS, DEFAULT_INITIAL_DELAY, op, is_retryable)
}

/// [`with_backoff`] with an explicit attempt budget and initial delay.
pub fn with_backoff_opts<T, E: Display>(
    name: &str,
    attempts: u32,
    initial_delay: Duration,
    mut op: impl FnMut() -> Result<T, E>,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let mut delay = initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                tracing::warn!(
                    target: TARGET,
                    "Retrying {} in {:.2} second(s) ({} / {} attempts): {}",
                    name,
                    delay.as_secs_f64(),
                    attempt,
                    attempts,
                    err
                );
                thread::sleep(delay);
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success_without_retrying() {
        let mut calls = 0;
        let result: Result<i32, String> = with_backoff_opts(
            "noop",
            10,
            Duration::ZERO,
            || {
                calls += 1;
                Ok(42)
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let mut calls = 0;
        let result: Result<&str, String> = with_backoff_opts(
            "flaky",
            10,
            Duration::ZERO,
            || {
                calls += 1;
                if calls < 3 {
                    Err("still racing".to_string())
                } else {
                    Ok("done")
                }
            },
            |_| true,
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_the_attempt_budget() {
        let mut calls = 0;
        let result: Result<(), String> = with_backoff_opts(
            "doomed",
            3,
            Duration::ZERO,
            || {
                calls += 1;
                Err("no luck".to_string())
            },
            |_| true,
        );
        assert_eq!(result.unwrap_err(), "no luck");
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_errors_pass_through_immediately() {
        let mut calls = 0;
        let result: Result<(), String> = with_backoff_opts(
            "fatal",
            10,
            Duration::ZERO,
            || {
                calls += 1;
                Err("structural".to_string())
            },
            |_| false,
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
