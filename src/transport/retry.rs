//! Retry executor for classified remote calls.

use std::future::Future;
use std::time::Instant;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::core::{KsefError, RetryPolicy};
use crate::transport::api::CallError;

/// Run `op` until it succeeds, fails terminally, or the policy is
/// exhausted.
///
/// `op` receives the 1-based attempt number and performs exactly one
/// remote call. Transient failures are retried after an exponential
/// backoff with jitter; terminal failures propagate immediately with
/// the authority's error intact. Each attempt runs under the policy's
/// per-attempt timeout, and a timed-out attempt counts as transient.
///
/// `cancel` aborts both in-flight attempts and pending backoff waits
/// with [`KsefError::Cancelled`].
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, KsefError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        // Biased so cancellation wins over a simultaneously ready
        // response, keeping shutdown prompt and deterministic.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(KsefError::Cancelled),
            outcome = time::timeout(policy.attempt_timeout, op(attempt)) => outcome,
        };

        let last_error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(CallError::Terminal(err))) => return Err(err),
            Ok(Err(CallError::Transient(reason))) => reason,
            Err(_) => format!(
                "attempt timed out after {}ms",
                policy.attempt_timeout.as_millis()
            ),
        };

        let delay = policy.backoff_delay(attempt, rand::random::<f64>());
        let out_of_attempts = attempt >= policy.max_attempts;
        let out_of_time = started.elapsed() + delay >= policy.max_elapsed;
        if out_of_attempts || out_of_time {
            return Err(KsefError::ExhaustedRetries {
                attempts: attempt,
                last_error,
            });
        }

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "transient failure, backing off"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(KsefError::Cancelled),
            _ = time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(80),
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_returns_immediately() {
        let cancel = CancellationToken::new();
        let result = execute(&quick_policy(), &cancel, |attempt| async move {
            Ok::<_, CallError>(attempt)
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let cancel = CancellationToken::new();
        let result = execute(&quick_policy(), &cancel, |attempt| async move {
            if attempt < 3 {
                Err(CallError::Transient("connection reset".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_at_once() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0u32);
        let result: Result<(), _> = execute(&quick_policy(), &cancel, |_| {
            calls.set(calls.get() + 1);
            async {
                Err(CallError::Terminal(KsefError::ValidationRejected {
                    reason_code: "B-102".into(),
                    message: "schema violation".into(),
                }))
            }
        })
        .await;
        assert_eq!(calls.get(), 1);
        match result.unwrap_err() {
            KsefError::ValidationRejected { reason_code, .. } => {
                assert_eq!(reason_code, "B-102");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = execute(&quick_policy(), &cancel, |attempt| async move {
            Err(CallError::Transient(format!("failure {attempt}")))
        })
        .await;
        match result.unwrap_err() {
            KsefError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "failure 4");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_counts_as_transient() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(5),
            ..quick_policy()
        };
        let result: Result<(), _> = execute(&policy, &cancel, |_| std::future::pending()).await;
        match result.unwrap_err() {
            KsefError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_cuts_retries_short() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_elapsed: Duration::ZERO,
            ..quick_policy()
        };
        let result: Result<(), _> = execute(&policy, &cancel, |_| async {
            Err(CallError::Transient("down".into()))
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            KsefError::ExhaustedRetries { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_pending_attempt() {
        let cancel = CancellationToken::new();
        let policy = quick_policy();
        let (result, ()) = tokio::join!(
            execute(&policy, &cancel, |_| std::future::pending::<
                Result<(), CallError>,
            >()),
            async { cancel.cancel() },
        );
        assert!(matches!(result.unwrap_err(), KsefError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_never_calls_op() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            execute(&quick_policy(), &cancel, |_| async { unreachable!() }).await;
        assert!(matches!(result.unwrap_err(), KsefError::Cancelled));
    }
}
