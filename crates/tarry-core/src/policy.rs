//! Error interpretation policies
//!
//! The dispatcher knows nothing about HTTP semantics. Every [`Request`]
//! carries an [`ErrorPolicy`] that turns a failed exchange into an [`Error`]
//! and decides whether that error is worth retrying. A policy may also hand
//! back a corrected body through [`ParsedError::patched_body`]; the corrected
//! body replaces the original for every later attempt of the same call.
//!
//! [`StandardPolicy`] is the status-code based policy used when a request does
//! not bring its own.
//!
//! [`Request`]: crate::Request

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transport::{TransportError, TransportErrorKind};
use crate::Error;

/// Everything known about a failed attempt
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    /// Status code, absent when the exchange itself failed
    pub status: Option<u16>,
    pub headers: Option<&'a HeaderMap>,
    /// Raw response body, empty when the exchange itself failed
    pub body: &'a [u8],
    pub transport_error: Option<&'a TransportError>,
}

impl<'a> ErrorContext<'a> {
    pub fn from_transport(error: &'a TransportError) -> Self {
        Self {
            status: None,
            headers: None,
            body: &[],
            transport_error: Some(error),
        }
    }

    pub fn from_response(status: u16, headers: &'a HeaderMap, body: &'a [u8]) -> Self {
        Self {
            status: Some(status),
            headers: Some(headers),
            body,
            transport_error: None,
        }
    }

    /// Body as text, lossy for non UTF-8 payloads (HTML error pages, ...)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body).into_owned()
    }

    /// `Retry-After` in seconds, when sent as a plain integer
    pub fn retry_after(&self) -> Option<u64> {
        self.headers?
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }
}

/// Result of interpreting a failed attempt
#[derive(Debug)]
pub struct ParsedError<B> {
    pub error: Error,
    /// Replacement body for the next attempts
    pub patched_body: Option<B>,
}

impl<B> ParsedError<B> {
    pub fn new(error: Error) -> Self {
        Self {
            error,
            patched_body: None,
        }
    }

    pub fn with_patch(mut self, body: B) -> Self {
        self.patched_body = Some(body);
        self
    }
}

impl<B> From<Error> for ParsedError<B> {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

/// Per-request failure handling supplied by provider wrappers
pub trait ErrorPolicy<B>: Send + Sync {
    /// Convert a non-2xx response or a transport failure into an error
    fn parse_error(&self, ctx: &ErrorContext<'_>, body: Option<&B>) -> ParsedError<B>;

    /// Whether retrying this error is pointless or harmful
    fn is_fatal(&self, error: &Error) -> bool;
}

/// Coarse failure category, used to decide whether a call is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// Malformed or rejected request (4xx)
    ClientError,
    /// The remote service failed (5xx)
    ServerError,
    /// Timeout, refused connection or interrupted body
    NetworkError,
    /// 429
    RateLimitError,
    /// 401 / 403
    AuthenticationError,
    Unknown,
}

impl ErrorClassification {
    /// Server, network and rate limit failures usually clear up on their own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::NetworkError | Self::RateLimitError
        )
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimitError,
            401 | 403 => Self::AuthenticationError,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn from_transport(error: &TransportError) -> Self {
        if error.is_transient() {
            return Self::NetworkError;
        }
        match error.kind {
            TransportErrorKind::Request => Self::ClientError,
            _ => Self::Unknown,
        }
    }

    /// Category of a dispatcher error, looking through exhausted retries
    pub fn of(error: &Error) -> Self {
        match error {
            Error::Transport(e) => Self::from_transport(e),
            Error::Upstream {
                status_code: Some(status),
                ..
            } => Self::from_status(*status),
            Error::Encode { .. } => Self::ClientError,
            Error::RetriesExhausted { last, .. } => Self::of(last),
            _ => Self::Unknown,
        }
    }
}

/// Provider error information extracted from a response body
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{message} (classification: {classification:?})")]
pub struct UpstreamDetails {
    pub classification: ErrorClassification,
    /// Provider-specific error code
    pub provider_code: Option<String>,
    pub message: String,
    /// Full JSON body when it parsed
    pub details: Option<Value>,
}

/// Status-code based policy: retries 5xx, 429 and transient transport errors
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPolicy;

impl StandardPolicy {
    /// Build the upstream error for a non-2xx response
    pub fn upstream_error(ctx: &ErrorContext<'_>) -> Error {
        let status = ctx.status.unwrap_or_default();
        let body = ctx.body_text();
        let details = serde_json::from_slice::<Value>(ctx.body).ok();
        let (provider_code, message) = extract_provider_error(&details, &body);
        let classification = ErrorClassification::from_status(status);

        Error::Upstream {
            message: format!("status code {}: {}", status, message),
            status_code: ctx.status,
            retry_after: ctx.retry_after(),
            source: Some(anyhow::Error::new(UpstreamDetails {
                classification,
                provider_code,
                message,
                details,
            })),
        }
    }
}

impl<B> ErrorPolicy<B> for StandardPolicy {
    fn parse_error(&self, ctx: &ErrorContext<'_>, _body: Option<&B>) -> ParsedError<B> {
        match ctx.transport_error {
            Some(e) => ParsedError::new(Error::Transport(e.clone())),
            None => ParsedError::new(Self::upstream_error(ctx)),
        }
    }

    fn is_fatal(&self, error: &Error) -> bool {
        !ErrorClassification::of(error).is_retryable()
    }
}

/// Error code and message of a JSON error body
///
/// Understands `{"error": {"code", "message"}}` envelopes and bare
/// `{"message"}` objects. Anything else, HTML gateway pages included, is
/// reported as the raw body text.
pub fn extract_provider_error(details: &Option<Value>, body: &str) -> (Option<String>, String) {
    let Some(json) = details else {
        return (None, body.to_string());
    };

    let object = json.get("error").unwrap_or(json);
    let code = object.get("code").and_then(Value::as_str).map(str::to_string);
    let message = object
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    (code, message)
}
