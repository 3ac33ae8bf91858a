//! Release and destroy semantics: double release, foreign release,
//! explicit destroy ordering.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corral::error::FactoryError;
use corral::{LogLevel, LogSink, Pool, PoolConfig, ResourceFactory};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Test factory with a destroy recorder
// ---------------------------------------------------------------------------

struct RecordingFactory {
    created: AtomicU32,
    destroyed: Arc<Mutex<Vec<u32>>>,
}

impl RecordingFactory {
    fn new() -> Self {
        Self {
            created: AtomicU32::new(0),
            destroyed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ResourceFactory for RecordingFactory {
    type Handle = u32;

    async fn create(&self) -> Result<u32, FactoryError> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, handle: Arc<u32>) {
        self.destroyed.lock().push(*handle);
    }
}

type LogRecord = Arc<Mutex<Vec<(LogLevel, String)>>>;

fn config_with_log(max: usize) -> (PoolConfig, LogRecord) {
    let records: LogRecord = Arc::new(Mutex::new(Vec::new()));
    let records_c = records.clone();
    let config = PoolConfig {
        name: "release-test".to_string(),
        min: 0,
        max,
        log: Some(LogSink::new(move |level, message| {
            records_c.lock().push((level, message.to_string()));
        })),
        ..Default::default()
    };
    (config, records)
}

fn error_messages(records: &LogRecord) -> Vec<String> {
    records
        .lock()
        .iter()
        .filter(|(level, _)| *level == LogLevel::Error)
        .map(|(_, message)| message.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Double release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_release_is_logged_and_changes_nothing() {
    let (config, records) = config_with_log(2);
    let pool = Pool::new(RecordingFactory::new(), config).unwrap();

    let handle = pool.acquire().await.unwrap();
    pool.release(handle.clone());
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.in_use(), 0);

    pool.release(handle);
    assert_eq!(pool.available(), 1, "second release must be a no-op");
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.size(), 1);

    let errors = error_messages(&records);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("double release"), "got: {}", errors[0]);
}

// ---------------------------------------------------------------------------
// Foreign release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_release_is_logged_and_changes_nothing() {
    let (config, records) = config_with_log(2);
    let pool = Pool::new(RecordingFactory::new(), config).unwrap();

    let handle = pool.acquire().await.unwrap();
    pool.release(Arc::new(99u32));

    assert_eq!(pool.in_use(), 1, "held handle must be untouched");
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.size(), 1);

    let errors = error_messages(&records);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("foreign release"), "got: {}", errors[0]);

    pool.release(handle);
    assert_eq!(pool.available(), 1);
}

// ---------------------------------------------------------------------------
// Destroy ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn destroys_run_in_call_order() {
    let factory = RecordingFactory::new();
    let destroyed = factory.destroyed.clone();
    let (config, _records) = config_with_log(2);
    let pool = Pool::new(factory, config).unwrap();

    let h0 = pool.acquire().await.unwrap();
    let h1 = pool.acquire().await.unwrap();
    assert_eq!((*h0, *h1), (0, 1));

    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.destroy(h1);
    pool.destroy(h0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        *destroyed.lock(),
        vec![1, 0],
        "factory teardown must follow destroy call order"
    );
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.stats().destroyed, 2);
}
