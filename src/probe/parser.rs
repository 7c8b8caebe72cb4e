//! Checker response parsers and IP frequency counting
//!
//! Each known checker endpoint reports the caller's IP in its own JSON
//! shape. The parser is chosen by exact match on the destination URL;
//! unknown destinations get a parser that extracts nothing.

use crate::probe::models::{IpFrequencyTable, ProbeResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// https://checker.soax.com reports `{"data": {"ip": ...}}`
pub const SOAX_CHECKER_URL: &str = "https://checker.soax.com/api/ipinfo";

/// https://ip.nf reports `{"ip": {"ip": ...}}`
pub const IP_NF_CHECKER_URL: &str = "https://ip.nf/me.json";

/// Why no IP could be taken from a response body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response carries no ip")]
    MissingIp,
    #[error("no parser for this destination")]
    Unsupported,
}

/// Extracts the reported IP from a checker's response body
pub trait ResponseParser: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_ip(&self, body: &str) -> Result<String, ParseError>;
}

#[derive(Deserialize)]
struct SoaxResponse {
    data: Option<SoaxData>,
}

#[derive(Deserialize)]
struct SoaxData {
    ip: Option<String>,
}

/// Parser for checker.soax.com
#[derive(Debug, Clone, Copy, Default)]
pub struct SoaxParser;

impl ResponseParser for SoaxParser {
    fn name(&self) -> &'static str {
        "soax"
    }

    fn extract_ip(&self, body: &str) -> Result<String, ParseError> {
        let response: SoaxResponse =
            serde_json::from_str(body).map_err(|e| ParseError::Malformed(e.to_string()))?;
        non_empty(response.data.and_then(|d| d.ip))
    }
}

#[derive(Deserialize)]
struct IpNfResponse {
    ip: Option<IpNfAddress>,
}

#[derive(Deserialize)]
struct IpNfAddress {
    ip: Option<String>,
}

/// Parser for ip.nf
#[derive(Debug, Clone, Copy, Default)]
pub struct IpNfParser;

impl ResponseParser for IpNfParser {
    fn name(&self) -> &'static str {
        "ip-nf"
    }

    fn extract_ip(&self, body: &str) -> Result<String, ParseError> {
        let response: IpNfResponse =
            serde_json::from_str(body).map_err(|e| ParseError::Malformed(e.to_string()))?;
        non_empty(response.ip.and_then(|a| a.ip))
    }
}

/// Parser for destinations with no known shape
#[derive(Debug, Clone, Copy, Default)]
pub struct NullParser;

impl ResponseParser for NullParser {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extract_ip(&self, _body: &str) -> Result<String, ParseError> {
        Err(ParseError::Unsupported)
    }
}

fn non_empty(ip: Option<String>) -> Result<String, ParseError> {
    match ip {
        Some(ip) if !ip.trim().is_empty() => Ok(ip.trim().to_string()),
        _ => Err(ParseError::MissingIp),
    }
}

/// Built-in parser selection by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    IpNf,
    Soax,
    None,
}

impl ParserKind {
    pub fn parser(self) -> Arc<dyn ResponseParser> {
        match self {
            ParserKind::IpNf => Arc::new(IpNfParser),
            ParserKind::Soax => Arc::new(SoaxParser),
            ParserKind::None => Arc::new(NullParser),
        }
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ip-nf" | "ipnf" => Ok(ParserKind::IpNf),
            "soax" => Ok(ParserKind::Soax),
            "none" => Ok(ParserKind::None),
            _ => Err(format!("Invalid checker: {}. Use: ip-nf, soax, none", s)),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserKind::IpNf => write!(f, "ip-nf"),
            ParserKind::Soax => write!(f, "soax"),
            ParserKind::None => write!(f, "none"),
        }
    }
}

/// Destination URL -> parser bindings
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn ResponseParser>>,
}

impl ParserRegistry {
    /// An empty registry; every destination gets the null parser
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the built-in checker endpoints
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SOAX_CHECKER_URL, Arc::new(SoaxParser));
        registry.register(IP_NF_CHECKER_URL, Arc::new(IpNfParser));
        registry
    }

    /// Bind a parser to a destination, replacing any earlier binding
    pub fn register(&mut self, destination: &str, parser: Arc<dyn ResponseParser>) {
        self.parsers.insert(destination.to_string(), parser);
    }

    /// Parser for a destination, by exact URL match
    pub fn select(&self, destination: &str) -> Arc<dyn ResponseParser> {
        match self.parsers.get(destination) {
            Some(parser) => Arc::clone(parser),
            None => {
                debug!(destination, "no parser registered, ip counting disabled");
                Arc::new(NullParser)
            }
        }
    }
}

/// Folds successful responses into an IP frequency table
#[derive(Debug, Clone)]
pub struct IpFrequencyBuilder {
    parser: Arc<dyn ResponseParser>,
}

impl IpFrequencyBuilder {
    pub fn new(parser: Arc<dyn ResponseParser>) -> Self {
        Self { parser }
    }

    pub fn build(&self, successes: &[ProbeResult]) -> IpFrequencyTable {
        let mut table = IpFrequencyTable::new();

        for result in successes {
            let Some(body) = result.body() else {
                continue;
            };
            match self.parser.extract_ip(body) {
                Ok(ip) => table.record(ip),
                Err(ParseError::Unsupported) => {}
                Err(e) => warn!(
                    port = result.port,
                    parser = self.parser.name(),
                    error = %e,
                    "skipping response without a usable ip"
                ),
            }
        }

        table
    }
}
