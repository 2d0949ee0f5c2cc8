//! The shared tier behind a pluggable backend.

use crate::error::{BackendError, CacheError};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Minimal contract a shared key/value store must satisfy to back the
/// distributed tier.
#[async_trait::async_trait]
pub trait DistributedBackend: Send + Sync + 'static {
    /// Fetch a value, `Ok(None)` on a miss
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, BackendError>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<(), BackendError>;

    /// Release the connection. Later calls may fail.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Process-local backend with per-entry expiry.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<Vec<u8>, (Bytes, Instant)>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|(_, expires)| *expires > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.is_closed() {
            Err(BackendError::Unavailable("backend closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DistributedBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, BackendError> {
        self.check_open()?;
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, expires)| *expires <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.check_open()?;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_vec(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::SeqCst);
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Wraps a backend with key namespacing and a bounded per-call timeout.
pub struct DistributedTier {
    backend: Arc<dyn DistributedBackend>,
    timeout: Duration,
    key_prefix: String,
}

impl DistributedTier {
    pub fn new(
        backend: Arc<dyn DistributedBackend>,
        timeout: Duration,
        key_prefix: String,
    ) -> Self {
        Self {
            backend,
            timeout,
            key_prefix,
        }
    }

    fn backend_key(&self, key: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key_prefix.len() + key.len());
        out.extend_from_slice(self.key_prefix.as_bytes());
        out.extend_from_slice(key.as_bytes());
        out
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let backend_key = self.backend_key(key);
        match tokio::time::timeout(self.timeout, self.backend.get(&backend_key)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout(self.timeout).into()),
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let backend_key = self.backend_key(key);
        match tokio::time::timeout(self.timeout, self.backend.set(&backend_key, value, ttl)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout(self.timeout).into()),
        }
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        match tokio::time::timeout(self.timeout, self.backend.close()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout(self.timeout).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledBackend;

    #[async_trait::async_trait]
    impl DistributedBackend for StalledBackend {
        async fn get(&self, _key: &[u8]) -> Result<Option<Bytes>, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn set(
            &self,
            _key: &[u8],
            _value: Bytes,
            _ttl: Duration,
        ) -> Result<(), BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn close(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_in_memory_backend_expiry() {
        let backend = InMemoryBackend::new();
        backend
            .set(b"k", Bytes::from_static(b"v"), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from_static(b"v")));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.get(b"k").await.unwrap(), None);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let backend = InMemoryBackend::new();
        backend.close().await.unwrap();
        assert!(matches!(
            backend.get(b"k").await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_tier_applies_key_prefix() {
        let backend = Arc::new(InMemoryBackend::new());
        let tier =
            DistributedTier::new(backend.clone(), Duration::from_secs(1), "app:".to_string());

        tier.set("user", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(backend.get(b"app:user").await.unwrap().is_some());
        assert!(backend.get(b"user").await.unwrap().is_none());
        assert!(tier.get("user").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let tier = DistributedTier::new(
            Arc::new(StalledBackend),
            Duration::from_millis(100),
            String::new(),
        );
        assert!(matches!(
            tier.get("k").await,
            Err(CacheError::BackendUnavailable(_))
        ));
    }
}
