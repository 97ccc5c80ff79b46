//! Abort-aware concurrency primitives.
//!
//! Every helper here guarantees that losing branches are cancelled before
//! the call returns: single-future races are `tokio::select!` over borrowed
//! futures (dropping the loser cancels it in place), and fan-out runs on a
//! `JoinSet` that is shut down (aborted and awaited) before an early
//! return. No background work outlives the call that spawned it.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Run `fut` against a cancellation token and an optional deadline.
///
/// Returns the future's own result if it finishes first. The token firing
/// first yields [`Error::Aborted`]; the deadline firing first yields
/// [`Error::Timeout`]. The losing branches are dropped (cancelled) before
/// this function returns.
pub async fn race_with_timeout<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
    timeout: Option<Duration>,
) -> Result<T, Error> {
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            // No deadline: this branch never resolves.
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = fut => result,
        _ = token.cancelled() => Err(Error::Aborted),
        _ = deadline => Err(Error::Timeout(timeout.unwrap_or_default())),
    }
}

/// Run N operations concurrently, racing the whole batch against `token`.
///
/// All complete → results in original input order. The token firing before
/// completion cancels every remaining operation, awaits the cancellations,
/// and returns [`Error::Aborted`]. The first operation failure likewise
/// cancels the siblings and propagates that error. An empty input returns
/// `Ok(vec![])` without touching the token.
pub async fn gather_or_abort<T, F>(
    token: &CancellationToken,
    operations: Vec<F>,
) -> Result<Vec<T>, Error>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Error>> + Send + 'static,
{
    if operations.is_empty() {
        return Ok(Vec::new());
    }

    let count = operations.len();
    let mut join_set = JoinSet::new();
    for (idx, operation) in operations.into_iter().enumerate() {
        join_set.spawn(async move { (idx, operation.await) });
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
    loop {
        tokio::select! {
            joined = join_set.join_next() => match joined {
                Some(Ok((idx, Ok(value)))) => slots[idx] = Some(value),
                Some(Ok((_, Err(e)))) => {
                    join_set.shutdown().await;
                    return Err(e);
                }
                Some(Err(join_err)) => {
                    join_set.shutdown().await;
                    return Err(Error::Tool(format!("gathered task panicked: {join_err}")));
                }
                None => break,
            },
            _ = token.cancelled() => {
                join_set.shutdown().await;
                return Err(Error::Aborted);
            }
        }
    }

    // Every slot is filled once join_next drains without an early return.
    Ok(slots
        .into_iter()
        .map(|slot| slot.expect("gathered result slot filled"))
        .collect())
}

/// Collect-errors variant of [`gather_or_abort`]: operation failures are
/// captured alongside successes, in original input order. Only the token
/// firing fails the call as a whole.
pub async fn gather_settled<T, F>(
    token: &CancellationToken,
    operations: Vec<F>,
) -> Result<Vec<Result<T, Error>>, Error>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Error>> + Send + 'static,
{
    if operations.is_empty() {
        return Ok(Vec::new());
    }

    let count = operations.len();
    let mut join_set = JoinSet::new();
    for (idx, operation) in operations.into_iter().enumerate() {
        join_set.spawn(async move { (idx, operation.await) });
    }

    let mut slots: Vec<Option<Result<T, Error>>> =
        std::iter::repeat_with(|| None).take(count).collect();
    loop {
        tokio::select! {
            joined = join_set.join_next() => match joined {
                Some(Ok((idx, result))) => slots[idx] = Some(result),
                Some(Err(join_err)) => {
                    tracing::error!(error = %join_err, "gathered task panicked");
                }
                None => break,
            },
            _ = token.cancelled() => {
                join_set.shutdown().await;
                return Err(Error::Aborted);
            }
        }
    }

    Ok(slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::Tool("gathered task panicked".into()))))
        .collect())
}
