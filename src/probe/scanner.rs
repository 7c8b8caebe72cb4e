//! End-to-end scan over a port range

use crate::probe::aggregator::{ResultAggregator, ScanError};
use crate::probe::config::ProbeConfig;
use crate::probe::dispatcher::ProbeDispatcher;
use crate::probe::models::{AggregateState, IpFrequencyTable};
use crate::probe::parser::{IpFrequencyBuilder, ParserRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration values echoed into reports
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub proxy_template: String,
    pub destination: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub port_from: u16,
    pub port_to: u16,
    pub parser: &'static str,
}

impl ScanSummary {
    fn new(config: &ProbeConfig, parser: &'static str) -> Self {
        Self {
            proxy_template: config.proxy_template.to_string(),
            destination: config.destination.to_string(),
            timeout_secs: config.timeout.as_secs(),
            concurrency: config.concurrency,
            port_from: config.port_from,
            port_to: config.port_to,
            parser,
        }
    }
}

/// Everything a finished scan produced
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub summary: ScanSummary,
    pub results: AggregateState,
    pub ip_frequencies: IpFrequencyTable,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn success_count(&self) -> usize {
        self.results.success.len()
    }

    pub fn error_count(&self) -> usize {
        self.results.error.len()
    }

    pub fn unique_ip_count(&self) -> usize {
        self.ip_frequencies.len()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Runs a whole scan: validate, dispatch, aggregate, count IPs
pub struct PortScanner {
    config: Arc<ProbeConfig>,
    registry: ParserRegistry,
}

impl PortScanner {
    /// Create a scanner that knows the built-in checkers
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_registry(config, ParserRegistry::with_builtin())
    }

    pub fn with_registry(config: ProbeConfig, registry: ParserRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<ScanReport, ScanError> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run the scan, stopping early if `cancel` fires.
    ///
    /// In-flight probes are cancelled whenever the scan ends without
    /// every port reporting.
    pub async fn run_with_cancel(&self, cancel: CancellationToken) -> Result<ScanReport, ScanError> {
        self.config.validate()?;

        let start = Instant::now();
        let parser = self.registry.select(self.config.destination.as_str());
        let deadline = self.config.effective_deadline();

        info!(
            proxy = %self.config.proxy_template,
            destination = %self.config.destination,
            from = self.config.port_from,
            to = self.config.port_to,
            concurrency = self.config.concurrency,
            parser = parser.name(),
            deadline_secs = deadline.as_secs(),
            "starting scan"
        );

        let dispatcher = ProbeDispatcher::new(Arc::clone(&self.config), cancel.child_token());
        let aggregator = ResultAggregator::new(self.config.ports());

        let rx = dispatcher.dispatch();
        let collected = aggregator.collect(rx, deadline, &cancel).await;
        // Stop stragglers; harmless when everything already reported
        dispatcher.cancel();
        let results = collected?;

        let summary = ScanSummary::new(&self.config, parser.name());
        let ip_frequencies = IpFrequencyBuilder::new(parser).build(&results.success);

        let report = ScanReport {
            summary,
            results,
            ip_frequencies,
            elapsed: start.elapsed(),
        };

        info!(
            success = report.success_count(),
            error = report.error_count(),
            unique_ips = report.unique_ip_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scan finished"
        );

        Ok(report)
    }
}
