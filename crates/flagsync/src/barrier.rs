//! Startup catch-up barrier.
//!
//! [`InitializationBarrier`] holds the end offsets captured when a
//! repository is constructed and waits until the consumption loop has
//! applied every record that existed at that instant. Progress is observed
//! through the `watch` channel the loop publishes [`ConsumedOffsets`]
//! snapshots on, so waiting never busy-polls.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::error::RepositoryError;
use crate::offsets::{ConsumedOffsets, EndOffsets};

/// Construction-time catch-up target.
#[derive(Debug, Clone)]
pub struct InitializationBarrier {
    targets: EndOffsets,
}

impl InitializationBarrier {
    /// Creates a barrier for the given end-offset snapshot.
    #[must_use]
    pub fn new(targets: EndOffsets) -> Self {
        Self { targets }
    }

    /// The captured end offsets.
    #[must_use]
    pub fn targets(&self) -> &EndOffsets {
        &self.targets
    }

    /// Partitions whose newest construction-time record has not been applied.
    ///
    /// Empty partitions are never pending.
    #[must_use]
    pub fn pending_partitions(&self, consumed: &ConsumedOffsets) -> Vec<i32> {
        self.targets
            .iter()
            .filter_map(|(partition, watermarks)| {
                let last = watermarks.last_offset()?;
                (!consumed.covers(partition, last)).then_some(partition)
            })
            .collect()
    }

    /// Returns `true` once every partition has caught up.
    #[must_use]
    pub fn is_satisfied_by(&self, consumed: &ConsumedOffsets) -> bool {
        self.pending_partitions(consumed).is_empty()
    }

    /// Waits until `progress` satisfies the barrier or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::InitializationTimeout` on timeout, or
    /// `RepositoryError::Closed` if the loop stopped before catching up.
    pub async fn wait(
        &self,
        progress: &mut watch::Receiver<ConsumedOffsets>,
        timeout: Duration,
    ) -> Result<(), RepositoryError> {
        let outcome = tokio::time::timeout(
            timeout,
            progress.wait_for(|consumed| self.is_satisfied_by(consumed)),
        )
        .await
        .map(|waited| waited.map(|_| ()));

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    partitions = self.targets.partition_count(),
                    "initialization barrier satisfied"
                );
                Ok(())
            }
            Ok(Err(_)) => Err(RepositoryError::Closed),
            Err(_) => {
                let pending = self.pending_partitions(&progress.borrow());
                Err(RepositoryError::InitializationTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    pending_partitions: pending.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::Watermarks;

    fn targets() -> EndOffsets {
        [
            (0, Watermarks::new(0, 3)),
            (1, Watermarks::new(0, 0)),
            (2, Watermarks::new(0, 1)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_empty_partitions_trivially_satisfied() {
        let barrier = InitializationBarrier::new(
            [(0, Watermarks::new(0, 0)), (1, Watermarks::new(5, 5))]
                .into_iter()
                .collect(),
        );
        assert!(barrier.is_satisfied_by(&ConsumedOffsets::new()));
    }

    #[test]
    fn test_pending_until_last_offset_applied() {
        let barrier = InitializationBarrier::new(targets());
        let mut consumed = ConsumedOffsets::new();
        assert_eq!(barrier.pending_partitions(&consumed), vec![0, 2]);

        consumed.advance(0, 1);
        consumed.advance(2, 0);
        assert_eq!(barrier.pending_partitions(&consumed), vec![0]);

        consumed.advance(0, 2);
        assert!(barrier.is_satisfied_by(&consumed));
    }

    #[tokio::test]
    async fn test_wait_returns_when_progress_catches_up() {
        let barrier = InitializationBarrier::new(targets());
        let (tx, mut rx) = watch::channel(ConsumedOffsets::new());

        let producer = tokio::spawn(async move {
            let mut consumed = ConsumedOffsets::new();
            consumed.advance(0, 2);
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(consumed.clone());
            consumed.advance(2, 0);
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(consumed);
            tx
        });

        barrier
            .wait(&mut rx, Duration::from_secs(2))
            .await
            .unwrap();
        drop(producer.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let barrier = InitializationBarrier::new(targets());
        let (_tx, mut rx) = watch::channel(ConsumedOffsets::new());

        let err = barrier
            .wait(&mut rx, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InitializationTimeout {
                timeout_ms: 30,
                pending_partitions: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_wait_reports_closed_loop() {
        let barrier = InitializationBarrier::new(targets());
        let (tx, mut rx) = watch::channel(ConsumedOffsets::new());
        drop(tx);

        let err = barrier
            .wait(&mut rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Closed));
    }

    #[tokio::test]
    async fn test_wait_on_empty_log_is_immediate() {
        let barrier = InitializationBarrier::new(EndOffsets::new());
        let (_tx, mut rx) = watch::channel(ConsumedOffsets::new());
        barrier
            .wait(&mut rx, Duration::from_millis(10))
            .await
            .unwrap();
    }
}
