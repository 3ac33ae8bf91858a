//! Pool configuration and validation.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::log::LogSink;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a resource pool.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Diagnostic label for this pool. Appears in errors and log messages.
    pub name: String,
    /// Floor: the pool maintains at least this many resources once the
    /// first destroy event has run.
    pub min: usize,
    /// Ceiling: hard cap on the number of resources alive or being created.
    pub max: usize,
    /// Time an idle resource may sit in the available list before reaping.
    pub idle_timeout: Duration,
    /// Period between reaper passes while the timer is armed.
    pub reap_interval: Duration,
    /// Maximum time an acquire may wait in the queue. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    /// When false, the reaper never removes idle resources.
    pub refresh_idle: bool,
    /// When true, released resources are inserted at the head of the
    /// available list (LIFO reuse) instead of the tail.
    pub return_to_head: bool,
    /// Optional callback sink for diagnostic messages.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub log: Option<LogSink>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            min: 0,
            max: 10,
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            acquire_timeout: None,
            refresh_idle: true,
            return_to_head: false,
            log: None,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, returning an error if invalid.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when `max` is zero, `min` exceeds
    /// `max`, a timeout is zero, or the acquire deadline is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::configuration("max must be greater than 0"));
        }
        if self.min > self.max {
            return Err(Error::configuration(format!(
                "min ({}) must not exceed max ({})",
                self.min, self.max
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::configuration("idle_timeout must be greater than zero"));
        }
        if self.reap_interval.is_zero() {
            return Err(Error::configuration(
                "reap_interval must be greater than zero",
            ));
        }
        if let Some(timeout) = self.acquire_timeout {
            if timeout.is_zero() {
                return Err(Error::configuration(
                    "acquire_timeout must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}
