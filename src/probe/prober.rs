//! Single-port proxy probe

use crate::probe::config::ProbeConfig;
use crate::probe::models::{ProbeError, ProbeResult};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode, Url};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Sends one GET to the destination through the proxy bound to a port
#[derive(Debug, Clone)]
pub struct ProxyProbe {
    config: Arc<ProbeConfig>,
}

impl ProxyProbe {
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }

    /// Probe one port.
    ///
    /// Never fails and never outlives the configured timeout: every
    /// problem ends up as a failed `ProbeResult`.
    pub async fn run(&self, port: u16) -> ProbeResult {
        let start = Instant::now();

        let result = match self.fetch(port).await {
            Ok(body) => ProbeResult::success(port, body),
            Err(cause) => ProbeResult::failure(port, cause),
        };

        debug!(
            port,
            elapsed_ms = start.elapsed().as_millis() as u64,
            success = result.is_success(),
            cause = result.cause().map(tracing::field::display),
            "probe finished"
        );

        result
    }

    async fn fetch(&self, port: u16) -> Result<String, ProbeError> {
        let proxy_url = self.config.proxy_template.render(port)?;

        // Client construction counts against the timeout so a probe never
        // holds its permit longer than one timeout.
        let request = async {
            let client = self.create_client(&proxy_url)?;
            let response = client
                .get(self.config.destination.clone())
                .send()
                .await
                .map_err(|e| ProbeError::Request(error_chain(&e)))?;

            let status = response.status();
            if status != StatusCode::OK {
                return Err(ProbeError::UnexpectedStatus(status.as_u16()));
            }

            response
                .text()
                .await
                .map_err(|e| ProbeError::BodyRead(error_chain(&e)))
        };

        // The client timeout covers the request itself; this is the hard
        // stop for client setup plus anything the transport ignores.
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Request(format!(
                "timed out after {}ms",
                self.config.timeout.as_millis()
            ))),
        }
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy_url: &Url) -> Result<Client, ProbeError> {
        let proxy = ReqwestProxy::all(proxy_url.as_str())
            .map_err(|e| ProbeError::InvalidProxyAddress(error_chain(&e)))?;

        Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| ProbeError::Request(error_chain(&e)))
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::config::DEFAULT_DESTINATION;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let err = Layer(
            "error sending request",
            Some(Box::new(Layer("connection refused", None))),
        );
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }

    #[tokio::test]
    async fn test_invalid_template_fails_without_network() {
        let config = ProbeConfig::new("ftp://127.0.0.1:%PORT%", DEFAULT_DESTINATION)
            .unwrap()
            .with_port_range(17000, 17000)
            .with_timeout(Duration::from_secs(1));
        let probe = ProxyProbe::new(Arc::new(config));

        let result = probe.run(17000).await;
        assert_eq!(result.port, 17000);
        assert!(matches!(
            result.cause(),
            Some(ProbeError::InvalidProxyAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_request_error() {
        // Bind then drop to get a local port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ProbeConfig::new("http://127.0.0.1:%PORT%", "http://checker.test/ip")
            .unwrap()
            .with_port_range(port, port)
            .with_timeout(Duration::from_secs(2));
        let result = ProxyProbe::new(Arc::new(config)).run(port).await;

        assert!(matches!(result.cause(), Some(ProbeError::Request(_))));
    }
}
