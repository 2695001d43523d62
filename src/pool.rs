//! Running many async thunks with a bounded number in flight.

use futures::StreamExt;
use futures::stream;
use std::future::Future;

/// Run `thunks` with at most `concurrency` in flight at any instant.
///
/// Thunks start in submission order as slots free up; when one finishes,
/// the next pending thunk starts. No thunk cancels or blocks its siblings:
/// everything runs to completion and the outputs come back in submission
/// order, so callers can aggregate failures after the fact. A thunk that
/// must be able to fail should return a `Result` as its output.
///
/// `concurrency == 1` degenerates to strict sequential execution; `0` is
/// clamped to 1.
pub async fn run_bounded<T, F, Fut>(concurrency: usize, thunks: Vec<F>) -> Vec<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let concurrency = concurrency.max(1);
    // buffer_unordered starts futures in order but yields them in
    // completion order; the index puts results back in submission order.
    let mut indexed: Vec<(usize, T)> = stream::iter(thunks.into_iter().enumerate())
        .map(|(index, thunk)| async move { (index, thunk().await) })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, output)| output).collect()
}
