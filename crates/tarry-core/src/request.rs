//! Request descriptor handed to the dispatcher
//!
//! A [`Request`] describes one logical outbound call: its target, its JSON
//! payload, its headers, a per-attempt timeout and the [`ErrorPolicy`] that
//! decides how failures are interpreted. The response type is chosen by the
//! caller at submission time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use crate::policy::{ErrorPolicy, StandardPolicy};
use crate::{Error, Result};

/// Per-attempt deadline used when the caller does not pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Description of one retryable outbound call
pub struct Request<B> {
    pub method: Method,
    pub url: String,
    pub body: Option<B>,
    pub headers: HeaderMap,
    pub timeout: Duration,
    /// Overrides the dispatcher's retry ceiling for this call
    pub max_retries: Option<u32>,
    pub(crate) policy: Arc<dyn ErrorPolicy<B>>,
}

impl<B> Request<B>
where
    B: Serialize + Send + Sync + 'static,
{
    /// Create a request with the standard status-based error policy
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: None,
            policy: Arc::new(StandardPolicy),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: B) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a header value; repeated names keep every value in order
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Configuration {
            message: format!("Invalid header name {:?}: {}", name, e),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::Configuration {
            message: format!("Invalid value for header {}: {}", name, e),
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Add an `Authorization: Bearer` header
    pub fn with_bearer_token(self, token: &str) -> Result<Self> {
        self.with_header("authorization", &format!("Bearer {}", token))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: ErrorPolicy<B> + 'static,
    {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_shared_policy(mut self, policy: Arc<dyn ErrorPolicy<B>>) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &dyn ErrorPolicy<B> {
        self.policy.as_ref()
    }
}

impl<B: fmt::Debug> fmt::Debug for Request<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
