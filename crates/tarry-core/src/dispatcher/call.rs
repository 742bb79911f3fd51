//! Type-erased pending calls
//!
//! The waiting queue holds calls with different body and response types. Each
//! call owns its request and the sending half of its caller's completion
//! channel; resolving a call consumes it, so a caller is answered at most once.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::attempt::attempt;
use crate::transport::Transport;
use crate::{Error, Request, Result};

/// Outcome of one retry
pub(crate) enum Retried {
    /// The call succeeded and its caller has the response
    Delivered,
    /// The call failed fatally and its caller has the error
    Rejected,
    /// The caller stopped waiting, so the call was dropped unsent
    Abandoned,
    /// The call failed with a retryable error; nobody was answered
    Failed {
        call: Box<dyn PendingCall>,
        error: Error,
    },
}

#[async_trait]
pub(crate) trait PendingCall: Send {
    async fn retry(self: Box<Self>, transport: &dyn Transport) -> Retried;

    /// Answer the caller with a terminal error
    fn give_up(self: Box<Self>, error: Error);

    fn max_retries(&self) -> Option<u32>;

    fn url(&self) -> &str;
}

pub(crate) struct Call<B, R> {
    request: Request<B>,
    reply: oneshot::Sender<Result<R>>,
}

impl<B, R> Call<B, R> {
    pub(crate) fn new(request: Request<B>) -> (Self, oneshot::Receiver<Result<R>>) {
        let (reply, receiver) = oneshot::channel();
        (Self { request, reply }, receiver)
    }

    fn deliver(self: Box<Self>, result: Result<R>) {
        let Call { request, reply } = *self;
        if reply.send(result).is_err() {
            log::debug!("Caller of {} stopped waiting, dropping its result", request.url);
        }
    }
}

#[async_trait]
impl<B, R> PendingCall for Call<B, R>
where
    B: Serialize + Send + Sync + 'static,
    R: DeserializeOwned + Send + 'static,
{
    async fn retry(self: Box<Self>, transport: &dyn Transport) -> Retried {
        let mut call = self;
        if call.reply.is_closed() {
            return Retried::Abandoned;
        }
        let result = attempt::<B, R>(transport, &mut call.request).await;
        match result {
            Ok(response) => {
                call.deliver(Ok(response));
                Retried::Delivered
            }
            Err(error) if call.request.policy.is_fatal(&error) => {
                call.deliver(Err(error));
                Retried::Rejected
            }
            Err(error) => Retried::Failed { call, error },
        }
    }

    fn give_up(self: Box<Self>, error: Error) {
        self.deliver(Err(error));
    }

    fn max_retries(&self) -> Option<u32> {
        self.request.max_retries
    }

    fn url(&self) -> &str {
        &self.request.url
    }
}
