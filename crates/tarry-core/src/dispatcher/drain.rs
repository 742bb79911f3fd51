//! Background drain loop and batch retry policy

use std::sync::Weak;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::Instrument;

use super::call::Retried;
use super::queue::Waiting;
use super::Shared;
use crate::Error;

/// Upper bound of the random part of the cooldown after a fatal retry
const FATAL_JITTER_MS: u64 = 1_000;

/// Runs until every dispatcher handle is gone
pub(crate) async fn drain_loop(shared: Weak<Shared>, interval: Duration) {
    loop {
        sleep(interval).await;

        let Some(shared) = shared.upgrade() else {
            log::debug!("Dispatcher dropped, stopping drain loop");
            return;
        };

        let batch = shared.queue.take_due(Instant::now());
        if batch.is_empty() {
            continue;
        }

        let span = tracing::debug_span!("drain_cycle", batch = batch.len());
        shared.run_batch(batch).instrument(span).await;
    }
}

impl Shared {
    /// Retry one batch of due calls, in order
    ///
    /// A retryable failure stops the batch: the failing call and every call
    /// not yet tried are pushed back with a longer backoff. Calls resolved
    /// earlier in the batch are not affected. A call that runs out of attempts
    /// is resolved like a fatal one and the batch goes on.
    pub(crate) async fn run_batch(&self, batch: Vec<Waiting>) {
        let factor = self.config.backoff_factor;
        let mut remaining = batch.into_iter();

        while let Some(entry) = remaining.next() {
            let Waiting {
                call,
                next_retry_at,
                backoff,
                attempts,
            } = entry;
            let url = call.url().to_string();

            match call.retry(self.transport.as_ref()).await {
                Retried::Delivered => {
                    log::info!("Retry of {} succeeded after {} attempts", url, attempts + 1);
                    sleep(success_pause(self.config.initial_delay)).await;
                }
                Retried::Rejected => {
                    log::error!("Retry of {} failed with a fatal error, giving up", url);
                    sleep(fatal_pause(self.config.fatal_cooldown)).await;
                }
                Retried::Abandoned => {
                    log::debug!("Caller of {} stopped waiting, dropping the request", url);
                }
                Retried::Failed { call, error } => {
                    let mut failed = Waiting {
                        call,
                        next_retry_at,
                        backoff,
                        attempts: attempts + 1,
                    };

                    if failed.is_exhausted(self.config.max_retries) {
                        let Waiting { call, attempts, .. } = failed;
                        log::error!("Giving up on {} after {} attempts: {}", url, attempts, error);
                        call.give_up(Error::RetriesExhausted {
                            attempts,
                            last: Box::new(error),
                        });
                        sleep(fatal_pause(self.config.fatal_cooldown)).await;
                        continue;
                    }

                    let now = Instant::now();
                    failed.reschedule(now, factor);
                    log::warn!(
                        "Retry of {} failed: {}, retrying in {:?}",
                        url,
                        error,
                        failed.backoff
                    );

                    let mut cohort = Vec::with_capacity(remaining.len() + 1);
                    cohort.push(failed);
                    cohort.extend(remaining.map(|mut entry| {
                        entry.reschedule(now, factor);
                        entry
                    }));
                    log::warn!("Backing off {} pending request(s)", cohort.len());
                    self.queue.extend(cohort);
                    return;
                }
            }
        }
    }
}

/// Random pause in `[0, initial_delay)` between successful retries
fn success_pause(initial_delay: Duration) -> Duration {
    if initial_delay.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..initial_delay)
}

fn fatal_pause(cooldown: Duration) -> Duration {
    cooldown + Duration::from_millis(rand::thread_rng().gen_range(0..FATAL_JITTER_MS))
}
