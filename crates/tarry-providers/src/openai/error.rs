//! OpenAI error payloads and the retry policy built on them

use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tarry_core::{Error, ErrorClassification, ErrorContext, ErrorPolicy, ParsedError};
use thiserror::Error;

use crate::budget::TokenBudget;

/// Error object returned by the OpenAI API
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(skip)]
    pub status_code: Option<u16>,
    /// Set when the request body was patched with a smaller `max_tokens`
    #[serde(skip)]
    pub retry_with_smaller_budget: bool,
}

/// Envelope of every OpenAI error response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// The message looks like a context overflow but its token counts are missing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not identify the token counts in the context length overflow error")]
pub struct UnreadableOverflow;

fn numbers() -> &'static Regex {
    static NUMBERS: OnceLock<Regex> = OnceLock::new();
    NUMBERS.get_or_init(|| Regex::new(r"(\d+)").expect("Valid regex pattern"))
}

/// Correction to apply to `max_tokens` when `message` reports a context overflow
///
/// OpenAI reports overflows as "This model's maximum context length is 4097
/// tokens, however you requested 4500 tokens (500 in your prompt; 4000 for
/// the completion)". The two largest numbers are the requested total and the
/// context length, so the returned delta is `context - requested - 1`.
///
/// Returns `Ok(None)` for any other message.
pub fn context_length_overflow(message: &str) -> Result<Option<i64>, UnreadableOverflow> {
    let message = message.to_lowercase();
    let mentions = |words: &[&str]| words.iter().all(|w| message.contains(w));
    if !mentions(&["maximum", "context", "length"]) && !mentions(&["reduce", "length", "context"]) {
        return Ok(None);
    }

    let (mut first, mut second) = (0i64, 0i64);
    for n in numbers()
        .find_iter(&message)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
    {
        if n > first {
            second = first;
            first = n;
        } else if n > second {
            second = n;
        }
    }

    if first == 0 || second == 0 {
        return Err(UnreadableOverflow);
    }
    Ok(Some(second - first - 1))
}

/// Error policy for OpenAI endpoints
///
/// Context length overflows are answered with a copy of the body whose
/// `max_tokens` is shrunk to fit, and are retried even though they come back
/// as 400. Other errors follow the status classification: 429, 5xx and
/// transient transport failures are retried, the rest is fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiPolicy;

impl OpenAiPolicy {
    fn overflow_patch<B>(api_error: &ApiError, body: Option<&B>) -> Option<B>
    where
        B: TokenBudget + Clone,
    {
        let delta = match context_length_overflow(&api_error.message) {
            Ok(Some(delta)) => delta,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not compute context length overflow correction: {}", e);
                return None;
            }
        };

        let patched = body.and_then(|b| b.with_budget_delta(delta));
        match &patched {
            Some(_) => info!(
                "Maximum context length overflow, decreasing max_tokens by {}",
                -delta
            ),
            None => warn!("Maximum context length overflow, but max_tokens cannot be decreased"),
        }
        patched
    }
}

impl<B> ErrorPolicy<B> for OpenAiPolicy
where
    B: TokenBudget + Clone + Send + Sync,
{
    fn parse_error(&self, ctx: &ErrorContext<'_>, body: Option<&B>) -> ParsedError<B> {
        if let Some(e) = ctx.transport_error {
            return ParsedError::new(Error::Transport(e.clone()));
        }

        let status = ctx.status.unwrap_or_default();
        let api_error = serde_json::from_slice::<ErrorResponse>(ctx.body)
            .ok()
            .and_then(|r| r.error);

        // gateways in front of the API sometimes answer with an HTML page
        let Some(mut api_error) = api_error else {
            return ParsedError::new(Error::Upstream {
                message: format!("status code {}: {}", status, ctx.body_text()),
                status_code: ctx.status,
                retry_after: ctx.retry_after(),
                source: None,
            });
        };

        api_error.status_code = ctx.status;
        let patched_body = Self::overflow_patch(&api_error, body);
        api_error.retry_with_smaller_budget = patched_body.is_some();

        ParsedError {
            error: Error::Upstream {
                message: format!("status code {}, message: {}", status, api_error.message),
                status_code: ctx.status,
                retry_after: ctx.retry_after(),
                source: Some(anyhow::Error::new(api_error)),
            },
            patched_body,
        }
    }

    fn is_fatal(&self, error: &Error) -> bool {
        if error
            .provider_error::<ApiError>()
            .is_some_and(|e| e.retry_with_smaller_budget)
        {
            return false;
        }
        !ErrorClassification::of(error).is_retryable()
    }
}
