//! Scan configuration and proxy address templates

use crate::probe::models::ProbeError;
use reqwest::Url;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Token replaced by the port number in placeholder templates
pub const PORT_PLACEHOLDER: &str = "%PORT%";

/// Default checker endpoint
pub const DEFAULT_DESTINATION: &str = "https://ip.nf/me.json";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default concurrency ceiling
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Largest concurrency ceiling a semaphore can hold
pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

/// Proxy schemes reqwest can route through
const SUPPORTED_PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Configuration errors, detected before any probe starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid destination url {url}: {reason}")]
    InvalidDestination { url: String, reason: String },
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
    #[error("concurrency {0} exceeds the maximum of {max}", max = MAX_CONCURRENCY)]
    ConcurrencyTooHigh(usize),
    #[error("invalid port range {from}-{to}: ports must be within 1-65535 and from <= to")]
    InvalidPortRange { from: u16, to: u16 },
}

/// How the port is combined with the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStrategy {
    /// Every `%PORT%` is replaced with the port
    Placeholder,
    /// `:<port>` is appended to a bare proxy host
    Suffix,
}

/// Proxy address template, e.g. `socks5://10.0.0.1:%PORT%` or `http://10.0.0.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTemplate {
    source: String,
    normalized: String,
    strategy: TemplateStrategy,
}

impl ProxyTemplate {
    /// Pick the strategy from the template's shape.
    ///
    /// Templates without a scheme are treated as `http://`.
    pub fn parse(template: &str) -> Self {
        let trimmed = template.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        if with_scheme.contains(PORT_PLACEHOLDER) {
            Self {
                source: template.to_string(),
                normalized: with_scheme,
                strategy: TemplateStrategy::Placeholder,
            }
        } else {
            let normalized = match with_scheme.split_once("://") {
                Some((scheme, host)) => format!("{}://{}", scheme, host.trim_end_matches('/')),
                None => with_scheme,
            };
            Self {
                source: template.to_string(),
                normalized,
                strategy: TemplateStrategy::Suffix,
            }
        }
    }

    pub fn strategy(&self) -> TemplateStrategy {
        self.strategy
    }

    /// The template as it was given
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Build the proxy endpoint for one port
    pub fn render(&self, port: u16) -> Result<Url, ProbeError> {
        let raw = match self.strategy {
            TemplateStrategy::Placeholder => {
                self.normalized.replace(PORT_PLACEHOLDER, &port.to_string())
            }
            TemplateStrategy::Suffix => format!("{}:{}", self.normalized, port),
        };

        let url = Url::parse(&raw)
            .map_err(|e| ProbeError::InvalidProxyAddress(format!("{}: {}", raw, e)))?;

        if !SUPPORTED_PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ProbeError::InvalidProxyAddress(format!(
                "{}: unsupported scheme {}",
                raw,
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProbeError::InvalidProxyAddress(format!("{}: missing host", raw)));
        }

        // A port that lands in the path or query would silently send every
        // probe through the scheme's default port.
        if url.port_or_known_default() != Some(port) {
            return Err(ProbeError::InvalidProxyAddress(format!(
                "{}: port {} is not the proxy port",
                raw, port
            )));
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(ProbeError::InvalidProxyAddress(format!(
                "{}: proxy address must not carry a path",
                raw
            )));
        }

        Ok(url)
    }
}

impl fmt::Display for ProxyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Immutable parameters of one scan
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Proxy address template
    pub proxy_template: ProxyTemplate,
    /// Checker endpoint every probe requests
    pub destination: Url,
    /// Timeout covering connect, response and body of one probe
    pub timeout: Duration,
    /// Maximum probes in flight, also the result channel capacity
    pub concurrency: usize,
    /// First port, inclusive
    pub port_from: u16,
    /// Last port, inclusive
    pub port_to: u16,
    /// Upper bound on the whole scan (derived when unset)
    pub scan_deadline: Option<Duration>,
}

impl ProbeConfig {
    /// Create a configuration, failing fast on an unusable destination
    pub fn new(proxy_template: &str, destination: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            proxy_template: ProxyTemplate::parse(proxy_template),
            destination: parse_destination(destination)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            port_from: 0,
            port_to: 0,
            scan_deadline: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_port_range(mut self, from: u16, to: u16) -> Self {
        self.port_from = from;
        self.port_to = to;
        self
    }

    pub fn with_scan_deadline(mut self, deadline: Duration) -> Self {
        self.scan_deadline = Some(deadline);
        self
    }

    /// Check every parameter before anything is dispatched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::ConcurrencyTooHigh(self.concurrency));
        }
        if self.port_from == 0 || self.port_from > self.port_to {
            return Err(ConfigError::InvalidPortRange {
                from: self.port_from,
                to: self.port_to,
            });
        }
        Ok(())
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.port_from..=self.port_to
    }

    /// Number of ports in the range, 0 when the range is inverted
    pub fn port_count(&self) -> usize {
        if self.port_from > self.port_to {
            0
        } else {
            usize::from(self.port_to - self.port_from) + 1
        }
    }

    /// Probes actually allowed in flight: never more than there are ports
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency
            .min(self.port_count())
            .clamp(1, MAX_CONCURRENCY)
    }

    /// The explicit deadline, or enough time for every batch of
    /// `concurrency` probes to run out its timeout, plus one spare timeout
    /// and a tenth of a timeout per batch for scheduling.
    pub fn effective_deadline(&self) -> Duration {
        if let Some(deadline) = self.scan_deadline {
            return deadline;
        }
        let batches = self.port_count().div_ceil(self.effective_concurrency());
        let batches = u32::try_from(batches).unwrap_or(u32::MAX);
        self.timeout
            .saturating_mul(batches.saturating_add(1))
            .saturating_add((self.timeout / 10).saturating_mul(batches))
    }
}

fn parse_destination(destination: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidDestination {
        url: destination.to_string(),
        reason,
    };

    let url = Url::parse(destination).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
