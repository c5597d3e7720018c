//! Bounded retry with a fixed backoff.
//!
//! Used for provider calls that fail transiently (network, flood control).
//! Permanent failures are returned immediately.

use std::{future::Future, time::Duration};

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, transient: bool) -> RetryDecision {
        if !transient || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Fatal(E),
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let transient = is_transient(&e);
                match policy.decide(attempt, transient) {
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, error = %e, "retrying in {d:?}");
                        tokio::time::sleep(d).await;
                        attempt += 1;
                    }
                    RetryDecision::NoRetry if transient => {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: e,
                        })
                    }
                    RetryDecision::NoRetry => return Err(RetryError::Fatal(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn respects_max_attempts() {
        let p = quick(3);
        assert!(matches!(p.decide(1, true), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, true), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, true), RetryDecision::NoRetry);
    }

    #[test]
    fn never_retries_permanent_errors() {
        assert_eq!(quick(5).decide(1, false), RetryDecision::NoRetry);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out: Result<u32, RetryError<String>> = run_with_retry(&quick(3), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("fail {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(3));
    }

    #[tokio::test]
    async fn reports_exhaustion_with_last_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), RetryError<String>> = run_with_retry(&quick(3), |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("fail {n}")) }
        })
        .await;
        assert_eq!(
            out,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "fail 3".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), RetryError<String>> = run_with_retry(&quick(5), |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;
        assert_eq!(out, Err(RetryError::Fatal("nope".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
