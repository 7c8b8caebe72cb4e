//! Proxy Egress - Port-range proxy prober
//!
//! Sends one request through every proxy port in a range and counts
//! which public IPs the ports actually egress through.
//! Many "different" ports often share a handful of upstream IPs.

pub mod probe;
pub mod report;

pub use probe::*;
pub use report::ReportWriter;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
