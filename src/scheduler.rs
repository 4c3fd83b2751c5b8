//! Cooperative chunk processing
//!
//! Large inputs are processed a chunk at a time with a yield to the runtime
//! between chunks, so a single-threaded host stays responsive. Chunking
//! redistributes work across yield points; it never skips or repeats an item.

use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Process `total` items in index order, `chunk_size` at a time.
///
/// `on_progress` receives the completed fraction after every chunk; values are
/// non-decreasing and the last one is exactly `1.0`. The token is checked
/// before the first chunk and after every yield; a cancelled run returns
/// `Error::Cancelled` having processed only whole chunks.
pub async fn process_in_chunks<F, P>(
    total: usize,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut process_one: F,
    mut on_progress: P,
) -> Result<()>
where
    F: FnMut(usize),
    P: FnMut(f64),
{
    let chunk_size = chunk_size.max(1);
    let mut processed = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let end = (processed + chunk_size).min(total);
        for index in processed..end {
            process_one(index);
        }
        processed = end;

        on_progress(if total == 0 { 1.0 } else { processed as f64 / total as f64 });

        if processed >= total {
            return Ok(());
        }

        tokio::task::yield_now().await;
    }
}

/// Yield point for streaming loops that do not know their item count up
/// front. Call [`ChunkYielder::tick`] once per item.
pub struct ChunkYielder<'a> {
    every: usize,
    count: usize,
    cancel: &'a CancellationToken,
}

impl<'a> ChunkYielder<'a> {
    pub fn new(every: usize, cancel: &'a CancellationToken) -> Self {
        Self {
            every: every.max(1),
            count: 0,
            cancel,
        }
    }

    /// Count one item, yielding to the runtime at every chunk boundary.
    /// Returns whether this call yielded.
    pub async fn tick(&mut self) -> Result<bool> {
        self.count += 1;
        if self.count % self.every != 0 {
            return Ok(false);
        }
        tokio::task::yield_now().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(true)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_every_item_once_in_order() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let mut progress = Vec::new();

        process_in_chunks(2500, 200, &token, |i| seen.push(i), |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(seen.len(), 2500);
        assert!(seen.iter().enumerate().all(|(pos, &i)| pos == i));
        assert_eq!(progress.len(), 13);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_empty_input_completes() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let mut progress = Vec::new();
        process_in_chunks(0, 100, &token, |_| calls += 1, |p| progress.push(p))
            .await
            .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(progress, vec![1.0]);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_still_progresses() {
        let token = CancellationToken::new();
        let mut calls = 0;
        process_in_chunks(5, 0, &token, |_| calls += 1, |_| {}).await.unwrap();
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_next_yield() {
        let token = CancellationToken::new();
        let mut calls = 0;
        let result = process_in_chunks(
            1000,
            100,
            &token,
            |i| {
                calls += 1;
                if i == 250 {
                    token.cancel();
                }
            },
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 300);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0;
        let result = process_in_chunks(10, 5, &token, |_| calls += 1, |_| {}).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_independent_runs_interleave() {
        let log = RefCell::new(Vec::new());
        let token = CancellationToken::new();

        let a = process_in_chunks(30, 10, &token, |i| log.borrow_mut().push(('a', i)), |_| {});
        let b = process_in_chunks(30, 10, &token, |i| log.borrow_mut().push(('b', i)), |_| {});
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        let log = log.into_inner();
        assert_eq!(log.len(), 60);
        let first_b = log.iter().position(|(t, _)| *t == 'b').unwrap();
        let last_a = log.iter().rposition(|(t, _)| *t == 'a').unwrap();
        assert!(first_b < last_a);

        let a_order: Vec<usize> = log.iter().filter(|(t, _)| *t == 'a').map(|(_, i)| *i).collect();
        assert_eq!(a_order, (0..30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_yielder_cancels_on_boundary() {
        let token = CancellationToken::new();
        let mut yielder = ChunkYielder::new(3, &token);
        assert!(!yielder.tick().await.unwrap());
        token.cancel();
        assert!(!yielder.tick().await.unwrap());
        assert!(matches!(yielder.tick().await, Err(Error::Cancelled)));
        assert_eq!(yielder.count(), 3);
    }
}
