//! Dispatcher tunables

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::MAX_BACKOFF;
use crate::{Error, Result};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 7;
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_FATAL_COOLDOWN: Duration = Duration::from_secs(10);

/// Configuration of a [`Dispatcher`](crate::Dispatcher)
///
/// Zero values are replaced by the defaults when the dispatcher is built, so
/// a partially filled configuration file behaves like the default one. Delays
/// longer than [`MAX_BACKOFF`] are cut down to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Interval between drain cycles and delay before the first retry
    pub initial_delay: Duration,
    /// Attempts allowed per call, the first one included
    ///
    /// The ceiling is checked after each failed retry, so a queued call is
    /// always retried at least once.
    pub max_retries: u32,
    /// Multiplier applied to a call's backoff each time it is rescheduled
    pub backoff_factor: u32,
    /// Pause after a retry ends in a fatal error
    pub fatal_cooldown: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            fatal_cooldown: DEFAULT_FATAL_COOLDOWN,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration from the three core tunables
    pub fn new(initial_delay: Duration, max_retries: u32, backoff_factor: u32) -> Self {
        Self {
            initial_delay,
            max_retries,
            backoff_factor,
            ..Default::default()
        }
        .normalized()
    }

    /// Load from `TARRY_*` environment variables, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Result<Option<u64>> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
                    Error::Configuration {
                        message: format!(
                            "{} must be a non-negative integer, got {:?}: {}",
                            key, raw, e
                        ),
                    }
                }),
            }
        };
        let small = |key: &str| -> Result<Option<u32>> {
            number(key)?
                .map(|n| {
                    u32::try_from(n).map_err(|_| Error::Configuration {
                        message: format!("{} is out of range: {}", key, n),
                    })
                })
                .transpose()
        };

        let mut config = Self::default();
        if let Some(secs) = number("TARRY_INITIAL_DELAY_SECS")? {
            config.initial_delay = Duration::from_secs(secs);
        }
        if let Some(retries) = small("TARRY_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(factor) = small("TARRY_BACKOFF_FACTOR")? {
            config.backoff_factor = factor;
        }
        if let Some(secs) = number("TARRY_FATAL_COOLDOWN_SECS")? {
            config.fatal_cooldown = Duration::from_secs(secs);
        }
        Ok(config.normalized())
    }

    /// Replace zero values with the defaults and cap the delays
    pub fn normalized(mut self) -> Self {
        if self.initial_delay.is_zero() {
            self.initial_delay = DEFAULT_INITIAL_DELAY;
        }
        self.initial_delay = self.initial_delay.min(MAX_BACKOFF);
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.backoff_factor == 0 {
            self.backoff_factor = DEFAULT_BACKOFF_FACTOR;
        }
        if self.fatal_cooldown.is_zero() {
            self.fatal_cooldown = DEFAULT_FATAL_COOLDOWN;
        }
        self.fatal_cooldown = self.fatal_cooldown.min(MAX_BACKOFF);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_fatal_cooldown(mut self, cooldown: Duration) -> Self {
        self.fatal_cooldown = cooldown;
        self
    }

    /// Validate dispatcher configuration
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::Configuration {
                message: "Initial delay cannot be zero".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(Error::Configuration {
                message: "Max retries cannot be zero".to_string(),
            });
        }
        if self.backoff_factor == 0 {
            return Err(Error::Configuration {
                message: "Backoff factor cannot be zero".to_string(),
            });
        }
        if self.initial_delay > MAX_BACKOFF || self.fatal_cooldown > MAX_BACKOFF {
            return Err(Error::Configuration {
                message: format!("Delays cannot exceed {:?}", MAX_BACKOFF),
            });
        }
        Ok(())
    }
}
