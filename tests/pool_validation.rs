//! Validation-path tests, both dispenser modes.
//!
//! Sync mode consults `validate` inline while dispensing; async mode moves
//! handles through the under-validation set and drives `validate_async`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corral::error::FactoryError;
use corral::{Pool, PoolConfig, ResourceFactory, ValidationMode};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Factory whose handles are only valid once "warmed"
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Session {
    generation: u32,
}

struct GenerationFactory {
    created: AtomicU32,
    destroyed: Arc<Mutex<Vec<u32>>>,
    mode: ValidationMode,
}

impl GenerationFactory {
    fn new(mode: ValidationMode) -> Self {
        Self {
            created: AtomicU32::new(0),
            destroyed: Arc::new(Mutex::new(Vec::new())),
            mode,
        }
    }
}

#[async_trait]
impl ResourceFactory for GenerationFactory {
    type Handle = Session;

    async fn create(&self) -> Result<Session, FactoryError> {
        Ok(Session {
            generation: self.created.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn destroy(&self, handle: Arc<Session>) {
        self.destroyed.lock().push(handle.generation);
    }

    fn validation_mode(&self) -> ValidationMode {
        self.mode
    }

    fn validate(&self, handle: &Session) -> bool {
        handle.generation > 0
    }

    async fn validate_async(&self, handle: &Session) -> bool {
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.generation > 0
    }
}

fn config(max: usize) -> PoolConfig {
    PoolConfig {
        name: "validation-test".to_string(),
        min: 0,
        max,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Sync mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sync_validation_discards_stale_handle_and_replaces_it() {
    let factory = GenerationFactory::new(ValidationMode::Sync);
    let destroyed = factory.destroyed.clone();
    let pool = Pool::new(factory, config(2)).unwrap();

    let first = pool.acquire().await.unwrap();
    assert_eq!(first.generation, 0);
    pool.release(first);

    // Generation 0 fails validation on the next dispense; the replacement
    // (generation 1) is created and delivered instead.
    let second = pool.acquire().await.unwrap();
    assert_eq!(second.generation, 1);

    pool.release(second);
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(pool.available(), 1);
    assert_eq!(pool.size(), 1);
    assert_eq!(*destroyed.lock(), vec![0]);
    assert_eq!(pool.stats().destroyed, 1);
}

// ---------------------------------------------------------------------------
// Async mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn async_validation_discards_stale_handle_and_replaces_it() {
    let factory = GenerationFactory::new(ValidationMode::Async);
    let destroyed = factory.destroyed.clone();
    let pool = Pool::new(factory, config(2)).unwrap();

    let first = pool.acquire().await.unwrap();
    assert_eq!(first.generation, 0);
    pool.release(first);

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.generation, 1);

    pool.release(second);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(pool.stats().validating, 0, "validations must quiesce");
    assert_eq!(pool.size(), 1);
    assert_eq!(*destroyed.lock(), vec![0]);
}

// ---------------------------------------------------------------------------
// Async mode: valid handle with no waiter left is put back
// ---------------------------------------------------------------------------

struct SlowValidFactory {
    created: AtomicU32,
}

#[async_trait]
impl ResourceFactory for SlowValidFactory {
    type Handle = u32;

    async fn create(&self) -> Result<u32, FactoryError> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    fn validation_mode(&self) -> ValidationMode {
        ValidationMode::Async
    }

    async fn validate_async(&self, _handle: &u32) -> bool {
        tokio::time::sleep(Duration::from_millis(20)).await;
        true
    }
}

#[tokio::test(start_paused = true)]
async fn validated_handle_returns_to_available_when_waiter_is_gone() {
    let mut cfg = config(1);
    cfg.acquire_timeout = Some(Duration::from_millis(10));
    let pool = Pool::new(
        SlowValidFactory {
            created: AtomicU32::new(0),
        },
        cfg,
    )
    .unwrap();

    let held = pool.acquire().await.unwrap();

    let pool_c = pool.clone();
    let pending = tokio::spawn(async move { pool_c.acquire().await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Release starts a 20ms validation; the waiter's 10ms deadline fires
    // first, so the validated handle has nobody left to serve.
    pool.release(held);
    assert_eq!(pool.stats().validating, 1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_retryable());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let stats = pool.stats();
    assert_eq!(stats.validating, 0);
    assert_eq!(stats.available, 1, "handle must be put back, not leaked");
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.size, 1);
}
