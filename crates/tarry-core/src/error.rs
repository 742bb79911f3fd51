//! Error types for the Tarry core library
//!
//! Every failure a caller can observe from the dispatcher is a variant of
//! [`Error`]. Provider-specific error payloads travel inside
//! [`Error::Upstream`] as an opaque `anyhow::Error` and can be recovered with
//! `downcast_ref`.

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for Tarry operations
#[derive(Error, Debug)]
pub enum Error {
    /// The request body could not be serialized to JSON
    #[error("Failed to encode request body: {message}")]
    Encode {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// A 2xx response body could not be decoded into the response type
    #[error("Failed to decode response: {message}")]
    Decode {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// The exchange did not complete (connection, DNS, timeout)
    #[error("HTTP request: {0}")]
    Transport(#[from] TransportError),

    /// The remote service answered with a non-2xx status
    #[error("Upstream error: {message}")]
    Upstream {
        message: String,
        status_code: Option<u16>,
        /// Seconds from the `Retry-After` header, if the service sent one
        retry_after: Option<u64>,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The call kept failing with retryable errors until its budget ran out
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// The drain loop went away before this call was resolved
    #[error("Dispatcher stopped before the request completed")]
    DispatcherStopped,

    /// `start` was called on a dispatcher whose loop is already running
    #[error("Dispatcher already started")]
    AlreadyStarted,

    /// A blocking submission was made before `start`
    #[error("Dispatcher not started")]
    NotStarted,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an upstream error from a status code and message
    pub fn upstream(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Error::Upstream {
            message: message.into(),
            status_code,
            retry_after: None,
            source: None,
        }
    }

    /// HTTP status attached to this error, looking through exhausted retries
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Upstream { status_code, .. } => *status_code,
            Error::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    /// Provider payload carried by an upstream error, if it has type `T`
    pub fn provider_error<T>(&self) -> Option<&T>
    where
        T: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Error::Upstream { source: Some(source), .. } => source.downcast_ref::<T>(),
            Error::RetriesExhausted { last, .. } => last.provider_error::<T>(),
            _ => None,
        }
    }
}
