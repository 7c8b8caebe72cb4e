//! Fan-in of probe results

use crate::probe::config::ConfigError;
use crate::probe::models::{AggregateState, ProbeResult};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that stop a scan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("scan incomplete: result channel closed after {received} of {expected} results")]
    Incomplete { received: usize, expected: usize },
    #[error("scan incomplete: deadline exceeded after {received} of {expected} results")]
    DeadlineExceeded { received: usize, expected: usize },
    #[error("scan incomplete: cancelled after {received} of {expected} results")]
    Cancelled { received: usize, expected: usize },
}

/// Single consumer of the result channel
///
/// Owns the success and error lists outright; nothing else touches them
/// while results are arriving.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    ports: RangeInclusive<u16>,
    expected: usize,
}

impl ResultAggregator {
    pub fn new(ports: RangeInclusive<u16>) -> Self {
        let expected = if ports.is_empty() {
            0
        } else {
            usize::from(*ports.end() - *ports.start()) + 1
        };
        Self { ports, expected }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Drain the channel until every port has reported exactly once.
    ///
    /// Fails if the channel closes early, the deadline passes, or the
    /// token is cancelled first.
    pub async fn collect(
        &self,
        mut rx: mpsc::Receiver<ProbeResult>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<AggregateState, ScanError> {
        let mut state = AggregateState::default();
        let mut seen = vec![false; self.expected];
        let progress_step = (self.expected / 10).max(1);

        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);

        while state.received < self.expected {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(received = state.received, expected = self.expected, "scan cancelled");
                    return Err(ScanError::Cancelled {
                        received: state.received,
                        expected: self.expected,
                    });
                }
                _ = &mut sleep => {
                    warn!(received = state.received, expected = self.expected, "scan deadline exceeded");
                    return Err(ScanError::DeadlineExceeded {
                        received: state.received,
                        expected: self.expected,
                    });
                }
                message = rx.recv() => {
                    let Some(result) = message else {
                        warn!(received = state.received, expected = self.expected, "result channel closed early");
                        return Err(ScanError::Incomplete {
                            received: state.received,
                            expected: self.expected,
                        });
                    };

                    if self.accept(&mut seen, &result) {
                        state.push(result);
                        if state.received % progress_step == 0 {
                            info!(
                                received = state.received,
                                expected = self.expected,
                                success = state.success.len(),
                                error = state.error.len(),
                                "scan progress"
                            );
                        }
                    }
                }
            }
        }

        debug!(expected = self.expected, "every port reported");
        Ok(state)
    }

    /// Mark the port as seen, rejecting strays and repeats
    fn accept(&self, seen: &mut [bool], result: &ProbeResult) -> bool {
        if !self.ports.contains(&result.port) {
            warn!(port = result.port, "result for a port outside the scan range");
            return false;
        }
        let slot = &mut seen[usize::from(result.port - *self.ports.start())];
        if *slot {
            warn!(port = result.port, "duplicate result ignored");
            return false;
        }
        *slot = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::models::ProbeError;

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_collects_and_partitions() {
        let (tx, rx) = mpsc::channel(4);
        let aggregator = ResultAggregator::new(100..=103);
        assert_eq!(aggregator.expected(), 4);

        tokio::spawn(async move {
            for port in [102, 100, 103, 101] {
                let result = if port % 2 == 0 {
                    ProbeResult::success(port, "ok".into())
                } else {
                    ProbeResult::failure(port, ProbeError::UnexpectedStatus(502))
                };
                tx.send(result).await.unwrap();
            }
        });

        let state = aggregator
            .collect(rx, LONG, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.received, 4);
        // Arrival order, not port order
        assert_eq!(
            state.success.iter().map(|r| r.port).collect::<Vec<_>>(),
            vec![102, 100]
        );
        assert_eq!(
            state.error.iter().map(|r| r.port).collect::<Vec<_>>(),
            vec![103, 101]
        );
    }

    #[tokio::test]
    async fn test_completes_without_waiting_for_close() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(ProbeResult::success(1, "a".into())).await.unwrap();
        tx.send(ProbeResult::success(2, "b".into())).await.unwrap();

        // Sender still alive: completion comes from the count alone
        let state = ResultAggregator::new(1..=2)
            .collect(rx, LONG, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.success.len(), 2);
        drop(tx);
    }

    #[tokio::test]
    async fn test_closed_channel_is_incomplete() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ProbeResult::success(10, "a".into())).await.unwrap();
        drop(tx);

        let err = ResultAggregator::new(10..=12)
            .collect(rx, LONG, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, ScanError::Incomplete { received: 1, expected: 3 });
        assert!(err.to_string().starts_with("scan incomplete"));
    }

    #[tokio::test]
    async fn test_stalled_channel_hits_deadline() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(ProbeResult::success(10, "a".into())).await.unwrap();

        let err = ResultAggregator::new(10..=11)
            .collect(rx, Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, ScanError::DeadlineExceeded { received: 1, expected: 2 });
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_stops_collection() {
        let (_tx, rx) = mpsc::channel::<ProbeResult>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ResultAggregator::new(10..=11)
            .collect(rx, LONG, &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, ScanError::Cancelled { received: 0, expected: 2 });
    }

    #[tokio::test]
    async fn test_duplicates_and_strays_are_ignored() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(ProbeResult::success(5, "a".into())).await.unwrap();
        tx.send(ProbeResult::success(5, "again".into())).await.unwrap();
        tx.send(ProbeResult::success(99, "stray".into())).await.unwrap();
        tx.send(ProbeResult::failure(6, ProbeError::Request("refused".into())))
            .await
            .unwrap();
        drop(tx);

        let state = ResultAggregator::new(5..=6)
            .collect(rx, LONG, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.received, 2);
        assert_eq!(state.success.len(), 1);
        assert_eq!(state.success[0].body(), Some("a"));
        assert_eq!(state.error.len(), 1);
    }
}
