//! Transport abstraction for a single HTTP exchange
//!
//! The dispatcher never talks to the network directly. Each attempt is handed
//! to a [`Transport`] as a fully assembled [`Exchange`], and the transport
//! reports back either the raw response or a [`TransportError`].

mod http;

pub use http::{ReqwestTransport, DEFAULT_USER_AGENT};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use thiserror::Error;

/// One fully assembled HTTP exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// Raw response as received from the remote service
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Kind of connection-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The per-attempt deadline elapsed
    Timeout,
    /// The connection could not be established
    Connect,
    /// The request could not be built (bad URL, bad header)
    Request,
    /// The response body could not be read
    Body,
    /// Anything else reported by the underlying client
    Other,
}

/// The exchange could not complete
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts and connection failures are worth another try
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Connect | TransportErrorKind::Body
        )
    }
}

/// Performs one HTTP round trip
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, exchange: Exchange) -> Result<RawResponse, TransportError>;
}
