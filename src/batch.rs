//! Batch Execution
//!
//! Runs independent jobs in bounded waves. Every job in a wave runs to
//! completion; a failed job becomes a [`BatchItem::Failed`] placeholder and
//! never cancels its siblings.

use crate::error::{GatewayError, Result};
use futures::future::join_all;
use std::future::Future;

/// Result slot for one job of a batch
#[derive(Debug)]
pub enum BatchItem<T> {
    Done(T),
    Failed { index: usize, error: GatewayError },
}

impl<T> BatchItem<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, BatchItem::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            BatchItem::Done(value) => Some(value),
            BatchItem::Failed { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            BatchItem::Done(value) => Ok(value),
            BatchItem::Failed { error, .. } => Err(error),
        }
    }

    /// User-facing text shown in place of a failed item
    pub fn placeholder(&self) -> Option<String> {
        match self {
            BatchItem::Done(_) => None,
            BatchItem::Failed { index, error } => Some(format!(
                "[Item {} could not be processed: {}]",
                index + 1,
                error.root()
            )),
        }
    }
}

/// Run `job` over `items`, at most `width` at a time
///
/// Results keep the input order. A wave starts only once the previous one
/// has fully settled.
pub async fn run_waves<I, T, F, Fut>(items: Vec<I>, width: usize, mut job: F) -> Vec<BatchItem<T>>
where
    F: FnMut(usize, I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let width = width.max(1);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut pending = items.into_iter().enumerate();

    loop {
        let wave: Vec<_> = pending
            .by_ref()
            .take(width)
            .map(|(index, item)| {
                let fut = job(index, item);
                async move { (index, fut.await) }
            })
            .collect();
        if wave.is_empty() {
            break;
        }

        for (index, outcome) in join_all(wave).await {
            match outcome {
                Ok(value) => results.push(BatchItem::Done(value)),
                Err(error) => {
                    tracing::warn!(index, total, error = %error, "batch item failed");
                    results.push(BatchItem::Failed { index, error });
                }
            }
        }
    }

    results
}
