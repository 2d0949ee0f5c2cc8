#![allow(dead_code)]

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::{
    BackendError, CacheConfig, CacheEngine, CacheValue, DistributedBackend, InMemoryBackend,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Config with the background loops disabled, so tests drive cycles explicitly.
pub fn quiet_config() -> CacheConfig {
    CacheConfig {
        enable_background_tasks: false,
        ..CacheConfig::default()
    }
}

/// In-memory backend that can be switched into an outage.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    down: AtomicBool,
    pub failed_calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub async fn stored_entries(&self) -> usize {
        self.inner.len().await
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DistributedBackend for FlakyBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, BackendError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inner.close().await
    }
}

pub fn engine_with<V: CacheValue>(
    config: CacheConfig,
    backend: Arc<FlakyBackend>,
) -> CacheEngine<V> {
    init_tracing();
    CacheEngine::init(config, backend).unwrap()
}
