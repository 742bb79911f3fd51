//! Retry dispatcher
//!
//! A [`Dispatcher`] tries every submitted request once right away. Requests
//! that fail with a retryable error are parked in a shared waiting queue and
//! their caller waits on a one-shot channel. A single background loop wakes up
//! every `initial_delay`, takes the due requests and retries them one after
//! another:
//!
//! - a success answers the caller, then the loop pauses for a random time
//!   below `initial_delay` so that recovered requests do not burst;
//! - a fatal error answers the caller, then the loop cools down;
//! - a retryable error pushes the failing request and every request not yet
//!   tried in this batch back into the queue with a longer backoff, and the
//!   batch ends. One overloaded endpoint usually affects all pending work, so
//!   the whole cohort backs off together.
//!
//! A request that has made `max_retries` attempts, the first one included,
//! is resolved with [`Error::RetriesExhausted`] after its next failed retry,
//! the same way a fatal error is; the rest of the batch goes on. A request
//! whose caller stopped waiting is dropped without being sent again.

mod call;
mod drain;
mod queue;

pub use queue::{scale_backoff, MAX_BACKOFF};

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::attempt::attempt;
use crate::transport::Transport;
use crate::{DispatcherConfig, Error, Request, Result};
use call::Call;
use queue::{Waiting, WaitingQueue};

/// State shared by every dispatcher handle and the drain loop
pub(crate) struct Shared {
    pub(crate) config: DispatcherConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) queue: WaitingQueue,
    /// Runtime running the drain loop, set once by `start`
    pub(crate) runtime: OnceLock<Handle>,
}

/// Retrying front end for outbound calls
///
/// Cloning is cheap and every clone shares the same queue and drain loop. The
/// loop stops once the last handle is dropped. A caller whose call is dropped
/// before it resolves, for instance when the runtime driving the loop shuts
/// down mid-batch, receives [`Error::DispatcherStopped`].
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.normalized(),
                transport,
                queue: WaitingQueue::default(),
                runtime: OnceLock::new(),
            }),
        }
    }

    pub fn with_transport<T>(config: DispatcherConfig, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::new(config, Arc::new(transport))
    }

    /// Spawn the drain loop on the current tokio runtime
    ///
    /// Fails with [`Error::AlreadyStarted`] if the loop is already running.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| Error::Configuration {
            message: format!("Dispatcher must be started inside a tokio runtime: {}", e),
        })?;
        if self.shared.runtime.set(handle.clone()).is_err() {
            return Err(Error::AlreadyStarted);
        }

        let interval = self.shared.config.initial_delay;
        handle.spawn(drain::drain_loop(Arc::downgrade(&self.shared), interval));
        log::info!(
            "Dispatcher started (initial delay {:?}, max retries {}, backoff factor {})",
            interval,
            self.shared.config.max_retries,
            self.shared.config.backoff_factor
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.runtime.get().is_some()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Number of calls waiting for a retry
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Send a request, retrying it in the background until it resolves
    ///
    /// Returns as soon as the first attempt succeeds or fails fatally.
    /// Otherwise the call is parked and this future completes only when the
    /// drain loop resolves it, which may take several backoff periods.
    #[tracing::instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn submit<B, R>(&self, mut request: Request<B>) -> Result<R>
    where
        B: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let error = match attempt::<B, R>(self.shared.transport.as_ref(), &mut request).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if request.policy.is_fatal(&error) || request.max_retries == Some(0) {
            return Err(error);
        }

        let delay = self.shared.config.initial_delay;
        log::warn!("Request to {} failed: {}, retrying in {:?}", request.url, error, delay);
        if !self.is_started() {
            log::warn!("Dispatcher not started, {} will wait until start is called", request.url);
        }

        let (call, receiver) = Call::<B, R>::new(request);
        self.shared.queue.push(Waiting::new(
            Box::new(call),
            Instant::now(),
            delay,
            self.shared.config.backoff_factor,
        ));

        receiver.await.unwrap_or_else(|_| Err(Error::DispatcherStopped))
    }

    /// Blocking form of [`submit`](Self::submit) for threads outside the runtime
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    #[cfg(feature = "blocking")]
    pub fn submit_blocking<B, R>(&self, request: Request<B>) -> Result<R>
    where
        B: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let handle = self.shared.runtime.get().ok_or(Error::NotStarted)?.clone();
        handle.block_on(self.submit(request))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.shared.config)
            .field("started", &self.is_started())
            .field("pending", &self.pending())
            .finish()
    }
}
