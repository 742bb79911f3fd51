//! `reqwest`-backed transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;

use super::{Exchange, RawResponse, Transport, TransportError, TransportErrorKind};
use crate::Result;

/// User agent sent when the caller did not set one
pub const DEFAULT_USER_AGENT: &str = concat!("tarry/", env!("CARGO_PKG_VERSION"));

/// Transport performing exchanges with a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Create a transport with its own connection pool
    pub fn new() -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::Error::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// Reuse an existing client (proxies, custom TLS roots, ...)
    pub fn with_client(client: ReqwestClient) -> Self {
        Self { client }
    }

    fn classify(error: &reqwest::Error) -> TransportErrorKind {
        if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_builder() {
            TransportErrorKind::Request
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        }
    }

    fn from_request_error(error: reqwest::Error) -> TransportError {
        TransportError::new(Self::classify(&error), error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn exchange(
        &self,
        exchange: Exchange,
    ) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(exchange.method, exchange.url.as_str())
            .headers(exchange.headers)
            .timeout(exchange.timeout);

        if let Some(body) = exchange.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Self::from_request_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Self::from_request_error)?;

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
