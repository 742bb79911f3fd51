//! Waiting queue shared between callers and the drain loop

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::call::PendingCall;

/// Upper bound for a single backoff step
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Multiply a delay by the backoff factor, saturating at [`MAX_BACKOFF`]
pub fn scale_backoff(delay: Duration, factor: u32) -> Duration {
    delay.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

/// A call parked until its next retry
pub(crate) struct Waiting {
    pub(crate) call: Box<dyn PendingCall>,
    pub(crate) next_retry_at: Instant,
    /// Delay applied the next time this entry is rescheduled
    pub(crate) backoff: Duration,
    /// Attempts made so far, the first one from `submit` included
    pub(crate) attempts: u32,
}

impl Waiting {
    /// Schedule a call whose first attempt just failed
    pub(crate) fn new(
        call: Box<dyn PendingCall>,
        now: Instant,
        initial_delay: Duration,
        factor: u32,
    ) -> Self {
        Self {
            call,
            next_retry_at: now + initial_delay,
            backoff: scale_backoff(initial_delay, factor),
            attempts: 1,
        }
    }

    pub(crate) fn reschedule(&mut self, now: Instant, factor: u32) {
        self.backoff = scale_backoff(self.backoff, factor);
        self.next_retry_at = now + self.backoff;
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.next_retry_at <= now
    }

    /// Whether the call has used up its attempts
    ///
    /// Only checked after a failed retry, so every queued call is retried at
    /// least once whatever its ceiling.
    pub(crate) fn is_exhausted(&self, default_max_retries: u32) -> bool {
        self.attempts >= self.call.max_retries().unwrap_or(default_max_retries)
    }
}

/// Unordered collection of parked calls behind one mutex
///
/// The lock is only held while entries are appended or extracted, never while
/// a call is in flight.
#[derive(Default)]
pub(crate) struct WaitingQueue {
    entries: Mutex<Vec<Waiting>>,
}

impl WaitingQueue {
    fn lock(&self) -> MutexGuard<'_, Vec<Waiting>> {
        // Nothing panics while the lock is held, so a poisoned queue is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, entry: Waiting) {
        self.lock().push(entry);
    }

    pub(crate) fn extend(&self, entries: impl IntoIterator<Item = Waiting>) {
        self.lock().extend(entries);
    }

    /// Remove and return every due entry, oldest first
    pub(crate) fn take_due(&self, now: Instant) -> Vec<Waiting> {
        let mut entries = self.lock();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
            .into_iter()
            .partition(|entry| entry.is_due(now));
        *entries = waiting;
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn backoffs(&self) -> Vec<(String, Duration, u32)> {
        self.lock()
            .iter()
            .map(|e| (e.call.url().to_string(), e.backoff, e.attempts))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn backoff_grows_geometrically(
            initial_ms in 1u64..10_000,
            factor in 1u32..4,
            steps in 0u32..6,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let mut backoff = scale_backoff(initial, factor);
            let mut previous = backoff;
            for _ in 0..steps {
                backoff = scale_backoff(backoff, factor);
                prop_assert!(backoff >= previous);
                previous = backoff;
            }
            prop_assert_eq!(backoff, initial * factor.pow(steps + 1));
        }

        #[test]
        fn backoff_never_exceeds_ceiling(initial_secs in 1u64..100_000, factor in 1u32..1000) {
            prop_assert!(scale_backoff(Duration::from_secs(initial_secs), factor) <= MAX_BACKOFF);
        }
    }

    #[test]
    fn test_factor_one_keeps_delay() {
        let delay = Duration::from_secs(30);
        assert_eq!(scale_backoff(delay, 1), delay);
    }

    #[test]
    fn test_overflow_saturates() {
        assert_eq!(scale_backoff(Duration::MAX, 2), MAX_BACKOFF);
    }
}
