//! HTTP transport for the transit API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use tracing::{debug, debug_span, Instrument};

use super::Endpoint;
use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// Executes GET requests against the transit API.
///
/// This is the seam between the client and the network; tests substitute
/// an in-memory implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `endpoint` and return the response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no response arrives and
    /// [`Error::Status`] for non-2xx responses.
    async fn get(&self, endpoint: &Endpoint) -> Result<String>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport from the API configuration.
    ///
    /// The bearer token, if any, is attached to every request as a default
    /// header. The connect timeout bounds connection setup; the read timeout
    /// bounds every wait for data from the server and resets after each read.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or token is invalid or the client
    /// cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config.parsed_base_url()?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                Error::ConfigValidation {
                    message: "token is not a valid header value".to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .default_headers(headers)
            .user_agent(concat!("busradar/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// The base URL endpoints are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, endpoint: &Endpoint) -> Result<String> {
        let url = endpoint.url(&self.base_url)?;
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.clone())
            .send()
            .instrument(debug_span!("request", endpoint = endpoint.name()))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .instrument(debug_span!("read body"))
            .await?;
        debug!(%url, bytes = body.len(), "Response received");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_with_default_config() {
        let transport = HttpTransport::new(&ApiConfig::default()).unwrap();
        assert_eq!(transport.base_url().scheme(), "https");
    }

    #[test]
    fn test_new_with_token() {
        let config = ApiConfig {
            token: Some("abc.def.ghi".to_string()),
            ..ApiConfig::default()
        };
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_new_rejects_bad_base_url() {
        let config = ApiConfig {
            base_url: "::nope".to_string(),
            ..ApiConfig::default()
        };
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn test_new_rejects_header_breaking_token() {
        let config = ApiConfig {
            token: Some("abc\r\nX-Injected: 1".to_string()),
            ..ApiConfig::default()
        };
        let err = HttpTransport::new(&config).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let config = ApiConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            connect_timeout_ms: 200,
            read_timeout_ms: 200,
            ..ApiConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .get(&Endpoint::Stop {
                stop_id: "1".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_silent_server_hits_read_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Accept and hold the connection without ever answering
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(socket);
        });

        let config = ApiConfig {
            base_url: format!("http://{addr}/"),
            connect_timeout_ms: 1_000,
            read_timeout_ms: 200,
            ..ApiConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            transport.get(&Endpoint::Stop {
                stop_id: "1".to_string(),
            }),
        )
        .await
        .expect("read timeout did not fire")
        .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        server.abort();
    }
}
