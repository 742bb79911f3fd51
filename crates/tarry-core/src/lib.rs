//! Tarry Core - batch retry with backoff for outbound AI API calls
//!
//! Provider wrappers describe each outbound call as a [`Request`] and hand it
//! to a shared [`Dispatcher`]. The dispatcher sends it once, and when the call
//! fails with a retryable error it parks the call and retries it later from a
//! single background loop, backing off the whole set of pending calls when
//! the remote service keeps failing.
//!
//! # Main Components
//!
//! - **Dispatcher**: waiting queue, drain loop and submission API
//! - **Request**: descriptor of one call plus its [`ErrorPolicy`]
//! - **Policy**: error interpretation, with [`StandardPolicy`] as default
//! - **Transport**: one HTTP exchange, implemented by [`ReqwestTransport`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tarry_core::{Dispatcher, DispatcherConfig, ReqwestTransport, Request, Result};
//!
//! async fn example() -> Result<()> {
//!     let transport = Arc::new(ReqwestTransport::new()?);
//!     let dispatcher = Dispatcher::new(DispatcherConfig::default(), transport);
//!     dispatcher.start()?;
//!
//!     let body = serde_json::json!({"input": "hi"});
//!     let request = Request::post("https://api.example.com/v1/embeddings", body)
//!         .with_bearer_token("sk-...")?;
//!     let _response: serde_json::Value = dispatcher.submit(request).await?;
//!     Ok(())
//! }
//! ```

mod attempt;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod policy;
pub mod request;
pub mod transport;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use policy::{ErrorClassification, ErrorContext, ErrorPolicy, ParsedError, StandardPolicy};
pub use request::Request;
pub use transport::{
    Exchange, RawResponse, ReqwestTransport, Transport, TransportError, TransportErrorKind,
};

// Re-export commonly used types
pub use reqwest::{Method, StatusCode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
