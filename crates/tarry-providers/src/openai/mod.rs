//! OpenAI client routed through the Tarry dispatcher
//!
//! Every call is described as a [`Request`] carrying [`OpenAiPolicy`] and
//! submitted to a shared [`Dispatcher`], so rate limits and overloaded
//! servers are absorbed by the dispatcher's retry queue instead of surfacing
//! to the caller.
//!
//! Endpoints: chat completions, completions, embeddings, moderations and the
//! model list.

mod error;
mod types;

pub use error::{context_length_overflow, ApiError, ErrorResponse, OpenAiPolicy, UnreadableOverflow};
pub use types::*;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tarry_core::{Dispatcher, Error, Method, Request, Result};

use crate::budget::TokenBudget;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for the OpenAI REST API
#[derive(Clone)]
pub struct OpenAi {
    dispatcher: Dispatcher,
    api_key: String,
    base_url: String,
    timeout: Option<Duration>,
}

impl OpenAi {
    pub fn new(dispatcher: Dispatcher, api_key: impl Into<String>) -> Self {
        Self {
            dispatcher,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
        }
    }

    /// Point the client at an OpenAI-compatible server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Per-attempt timeout, the request default otherwise
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request<B>(&self, method: Method, path: &str, body: Option<B>) -> Result<Request<B>>
    where
        B: Serialize + TokenBudget + Clone + Send + Sync + 'static,
    {
        if self.api_key.is_empty() {
            return Err(Error::Configuration {
                message: "OpenAI API key is empty".to_string(),
            });
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut request = Request::new(method, url)
            .with_bearer_token(&self.api_key)?
            .with_policy(OpenAiPolicy);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        Ok(request)
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: Option<B>) -> Result<R>
    where
        B: Serialize + TokenBudget + Clone + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let request = self.request(method, path, body)?;
        self.dispatcher.submit(request).await
    }

    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        self.call(Method::POST, "v1/chat/completions", Some(request)).await
    }

    pub async fn completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.call(Method::POST, "v1/completions", Some(request)).await
    }

    pub async fn embeddings(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        self.call(Method::POST, "v1/embeddings", Some(request)).await
    }

    /// Classify text against the moderation policy
    pub async fn moderations(&self, request: ModerationRequest) -> Result<ModerationResponse> {
        self.call(Method::POST, "v1/moderations", Some(request)).await
    }

    pub async fn list_models(&self) -> Result<ListModelsResponse> {
        self.call::<Value, _>(Method::GET, "v1/models", None).await
    }
}

impl std::fmt::Debug for OpenAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAi")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
