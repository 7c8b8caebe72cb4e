//! Probe data models

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Why a single probe failed
///
/// Causes are kept as strings so results stay `Clone` and serializable
/// after the underlying transport error is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("invalid proxy address: {0}")]
    InvalidProxyAddress(String),
    #[error("request error: {0}")]
    Request(String),
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),
    #[error("body read error: {0}")]
    BodyRead(String),
}

impl Serialize for ProbeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProbeOutcome {
    /// HTTP 200 with the raw, unparsed body
    Success { body: String },
    Failure { cause: ProbeError },
}

/// Result of probing a single port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub port: u16,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn success(port: u16, body: String) -> Self {
        Self {
            port,
            outcome: ProbeOutcome::Success { body },
        }
    }

    pub fn failure(port: u16, cause: ProbeError) -> Self {
        Self {
            port,
            outcome: ProbeOutcome::Failure { cause },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success { .. })
    }

    /// Response body, present only on success
    pub fn body(&self) -> Option<&str> {
        match &self.outcome {
            ProbeOutcome::Success { body } => Some(body),
            ProbeOutcome::Failure { .. } => None,
        }
    }

    /// Failure cause, present only on failure
    pub fn cause(&self) -> Option<&ProbeError> {
        match &self.outcome {
            ProbeOutcome::Success { .. } => None,
            ProbeOutcome::Failure { cause } => Some(cause),
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            ProbeOutcome::Success { body } => write!(f, "{}: {}", self.port, body),
            ProbeOutcome::Failure { cause } => write!(f, "{}: {}", self.port, cause),
        }
    }
}

/// Collected results of a scan, in arrival order
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateState {
    pub success: Vec<ProbeResult>,
    pub error: Vec<ProbeResult>,
    pub received: usize,
}

impl AggregateState {
    pub(crate) fn push(&mut self, result: ProbeResult) {
        if result.is_success() {
            self.success.push(result);
        } else {
            self.error.push(result);
        }
        self.received += 1;
    }
}

/// Observed IP address -> number of probes that reported it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IpFrequencyTable {
    counts: HashMap<String, usize>,
}

impl IpFrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ip: String) {
        *self.counts.entry(ip).or_insert(0) += 1;
    }

    pub fn count(&self, ip: &str) -> usize {
        self.counts.get(ip).copied().unwrap_or(0)
    }

    /// Number of distinct IPs
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(ip, count)| (ip.as_str(), *count))
    }

    /// Entries ordered by descending count, then by IP
    pub fn sorted(&self) -> Vec<(&str, usize)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}
