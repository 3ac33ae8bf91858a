//! Error types for pool operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error produced by a factory's `create` operation.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for pool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// The error message.
        message: String,
    },

    /// The pool is draining and no longer accepts acquire requests.
    #[error("pool '{pool}' is draining and cannot accept work")]
    Draining {
        /// The pool name.
        pool: String,
    },

    /// The factory failed to create a resource assigned to this caller.
    #[error("resource creation failed for pool '{pool}': {source}")]
    Factory {
        /// The pool name.
        pool: String,
        /// The underlying factory error.
        #[source]
        source: FactoryError,
    },

    /// The acquire deadline expired while waiting for a resource.
    #[error("acquire timed out after {timeout_ms}ms for pool '{pool}'")]
    AcquireTimeout {
        /// The pool name.
        pool: String,
        /// The configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Internal defect (e.g. a result channel closed out of contract).
    #[error("internal error in pool '{pool}': {message}")]
    Internal {
        /// The pool name.
        pool: String,
        /// The error message.
        message: String,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a draining error.
    pub fn draining(pool: impl Into<String>) -> Self {
        Self::Draining { pool: pool.into() }
    }

    /// Create a factory error wrapping the underlying create failure.
    pub fn factory(pool: impl Into<String>, source: FactoryError) -> Self {
        Self::Factory {
            pool: pool.into(),
            source,
        }
    }

    /// Create an acquire-timeout error.
    pub fn acquire_timeout(pool: impl Into<String>, timeout: Duration) -> Self {
        Self::AcquireTimeout {
            pool: pool.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an internal error.
    pub fn internal(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            pool: pool.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. })
    }
}
