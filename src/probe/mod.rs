//! Probe module for scanning a range of proxy ports
//!
//! This module provides functionality for:
//! - Building a proxy endpoint per port from an address template
//! - Probing every port concurrently under a concurrency ceiling
//! - Collecting results through a single consumer with a deadline
//! - Counting the egress IPs reported by known checker endpoints

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod models;
pub mod parser;
pub mod prober;
pub mod scanner;

pub use aggregator::{ResultAggregator, ScanError};
pub use config::{ConfigError, ProbeConfig, ProxyTemplate, TemplateStrategy};
pub use dispatcher::ProbeDispatcher;
pub use models::{AggregateState, IpFrequencyTable, ProbeError, ProbeOutcome, ProbeResult};
pub use parser::{
    IpFrequencyBuilder, IpNfParser, NullParser, ParseError, ParserKind, ParserRegistry,
    ResponseParser, SoaxParser,
};
pub use prober::ProxyProbe;
pub use scanner::{PortScanner, ScanReport, ScanSummary};
