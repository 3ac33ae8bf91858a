//! # Corral
//!
//! A generic resource pool: mediates access to a bounded collection of
//! expensive, reusable resources (database connections, sockets, worker
//! handles) between many concurrent callers.
//!
//! Callers [`acquire`](pool::Pool::acquire) a handle, use it exclusively,
//! and [`release`](pool::Pool::release) it. The pool caches idle handles,
//! creates new ones on demand up to a configured ceiling, maintains a floor
//! of warm handles, validates handles before dispatch, reaps idle ones past
//! their timeout, and shuts down in an orderly fashion via
//! [`drain`](pool::Pool::drain).
//!
//! Resources are produced by a user-supplied [`ResourceFactory`]; the pool
//! treats handles as opaque and tracks them by identity.
//!
//! ```no_run
//! use corral::{Pool, PoolConfig, ResourceFactory};
//! use corral::error::FactoryError;
//! use async_trait::async_trait;
//!
//! struct Connector;
//!
//! #[async_trait]
//! impl ResourceFactory for Connector {
//!     type Handle = String;
//!
//!     async fn create(&self) -> Result<String, FactoryError> {
//!         Ok("connection".to_string())
//!     }
//! }
//!
//! # async fn example() -> corral::Result<()> {
//! let pool = Pool::new(Connector, PoolConfig {
//!     name: "db".to_string(),
//!     min: 2,
//!     max: 10,
//!     ..Default::default()
//! })?;
//!
//! let conn = pool.acquire().await?;
//! // ... use the connection ...
//! pool.release(conn);
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod guard;
pub mod log;
pub mod pool;

pub use config::PoolConfig;
pub use error::{Error, FactoryError, Result};
pub use factory::{ResourceFactory, ValidationMode};
pub use guard::PoolGuard;
pub use log::{LogLevel, LogSink};
pub use pool::{Pool, PoolStats};
