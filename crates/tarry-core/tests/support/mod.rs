//! Shared test support utilities for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tarry_core::{Exchange, RawResponse, Transport, TransportError, TransportErrorKind};
use tokio::time::Instant;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16, String),
    Fail(TransportErrorKind),
}

impl Step {
    pub fn status(status: u16) -> Self {
        Step::Status(status, format!(r#"{{"error":{{"message":"status {}"}}}}"#, status))
    }
}

/// What the transport saw for one exchange
#[derive(Debug, Clone)]
pub struct Sent {
    pub url: String,
    pub body: Option<Value>,
    pub at: Instant,
}

/// Transport answering each URL from its script, `{"ok":true}` once the script runs out
pub struct ScriptedTransport {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, url: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Fail `url` with the given status `times` times
    pub fn failing(self, url: &str, status: u16, times: usize) -> Self {
        self.on(url, std::iter::repeat(Step::status(status)).take(times))
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, url: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.url == url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, exchange: Exchange) -> Result<RawResponse, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            url: exchange.url.clone(),
            body: exchange
                .body
                .as_deref()
                .and_then(|b| serde_json::from_slice(b).ok()),
            at: Instant::now(),
        });

        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&exchange.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Step::Status(200, r#"{"ok":true}"#.to_string()));

        match step {
            Step::Status(status, body) => Ok(RawResponse {
                status,
                headers: HeaderMap::new(),
                body: body.into_bytes(),
            }),
            Step::Fail(kind) => Err(TransportError::new(kind, "scripted transport failure")),
        }
    }
}

/// Round an elapsed time to whole seconds
pub fn secs(since: Instant, at: Instant) -> u64 {
    ((at - since).as_millis() as u64 + 500) / 1000
}

/// Yield until `condition` holds, without letting paused time advance
pub async fn settle<F: Fn() -> bool>(condition: F) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub const INITIAL: Duration = Duration::from_secs(30);
