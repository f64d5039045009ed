//! Bounded polling and retry.
//!
//! These are the only places the driver suspends outside of backend I/O.
//! Neither primitive can be cancelled from the outside: a wait ends when its
//! predicate succeeds or its time budget is spent, a retry ends when the
//! action succeeds or its attempts run out. Elapsed time is measured with
//! [`tokio::time::Instant`], so an in-flight backend call is never
//! interrupted; the deadline is only checked between polls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Default overall budget for [`wait_for_condition`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default pause between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors produced by the wait primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The condition never held within the budget.
    #[error("Wait For Condition timeout {}", .0.as_millis())]
    Timeout(Duration),
}

/// Polls `probe` until it yields a value.
///
/// `probe` returning `Ok(None)` or `Err(_)` counts as "not yet": the loop
/// sleeps `interval` and tries again while less than `timeout` has elapsed
/// since the first poll. The first `Ok(Some(v))` is returned immediately.
pub async fn poll_until<T, E, F, Fut>(
    mut probe: F,
    timeout: Duration,
    interval: Duration,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let deadline = Instant::now() + timeout;
    let mut polls = 0u32;

    loop {
        polls += 1;
        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => trace!(polls, "condition not met"),
            Err(e) => trace!(polls, error = %e, "condition probe failed"),
        }

        if Instant::now() >= deadline {
            return Err(WaitError::Timeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Repeatedly evaluates an asynchronous predicate until it reports `true`.
///
/// A predicate that resolves to `false` or fails is retried after
/// `interval`; once `timeout` has elapsed the wait fails with
/// [`WaitError::Timeout`].
pub async fn wait_for_condition<E, F, Fut>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    poll_until(
        || {
            let fut = predicate();
            async move { fut.await.map(|ok| ok.then_some(())) }
        },
        timeout,
        interval,
    )
    .await
}

/// Invokes `action` until it succeeds.
///
/// After each failure the call sleeps `interval` and tries again. With
/// `max_retries` set to `Some(n)` there are at most `n + 1` invocations in
/// total; once they are used up the last error is returned. `None` retries
/// without bound.
pub async fn retry<T, E, F, Fut>(
    mut action: F,
    interval: Duration,
    max_retries: Option<u32>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut remaining = max_retries;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) => match remaining {
                Some(0) => return Err(e),
                Some(n) => {
                    trace!(remaining = n, error = %e, "retrying");
                    remaining = Some(n - 1);
                }
                None => trace!(error = %e, "retrying"),
            },
        }
        tokio::time::sleep(interval).await;
    }
}
