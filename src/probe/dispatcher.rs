//! Fan-out of one probe per port

use crate::probe::config::ProbeConfig;
use crate::probe::models::ProbeResult;
use crate::probe::prober::ProxyProbe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Launches a probe for every port in the configured range
pub struct ProbeDispatcher {
    config: Arc<ProbeConfig>,
    cancel: CancellationToken,
}

impl ProbeDispatcher {
    pub fn new(config: Arc<ProbeConfig>, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Spawn every probe and hand back the receiving end of the result channel.
    ///
    /// Returns immediately. At most `concurrency` probes run at once, and
    /// the channel closes once every probe task has finished or given up.
    pub fn dispatch(&self) -> mpsc::Receiver<ProbeResult> {
        let concurrency = self.config.effective_concurrency();
        let (tx, rx) = mpsc::channel(concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let probe = ProxyProbe::new(Arc::clone(&self.config));

        for port in self.config.ports() {
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let probe = probe.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = async {
                        // Only fails once the semaphore is closed
                        let _permit = semaphore.acquire().await.ok()?;
                        Some(probe.run(port).await)
                    } => result,
                };

                let Some(result) = result else {
                    trace!(port, "probe cancelled");
                    return;
                };

                if tx.send(result).await.is_err() {
                    debug!(port, "result dropped, aggregator is gone");
                }
            });
        }

        rx
    }

    /// Abort probes that are still waiting or running
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn config(from: u16, to: u16, concurrency: usize) -> Arc<ProbeConfig> {
        Arc::new(
            ProbeConfig::new("ftp://127.0.0.1:%PORT%", "http://checker.test/ip")
                .unwrap()
                .with_port_range(from, to)
                .with_concurrency(concurrency)
                .with_timeout(Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_every_port_reported_once() {
        let dispatcher = ProbeDispatcher::new(config(17000, 17049, 4), CancellationToken::new());
        let mut rx = dispatcher.dispatch();

        let mut ports = HashSet::new();
        while let Some(result) = rx.recv().await {
            assert!(ports.insert(result.port), "port {} reported twice", result.port);
        }

        assert_eq!(ports, (17000..=17049).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_closes_channel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = ProbeDispatcher::new(config(17000, 17009, 2), cancel);
        let mut rx = dispatcher.dispatch();

        // Probes may or may not win the race against cancellation, but the
        // channel must close either way.
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert!(received <= 10);
    }
}
