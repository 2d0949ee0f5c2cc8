use crate::codec::CacheValue;
use crate::engine::CacheEngine;
use crate::error::CacheError;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// An async function whose results are cached in a [`CacheEngine`].
///
/// `key_fn` derives the cache key from the argument; `f` runs only on a miss
/// and its successful result is stored with `ttl`. Errors from `f` are
/// returned as-is and never cached.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use tiercache::{CacheConfig, CacheEngine, CacheError, InMemoryBackend, Memoized};
/// # async fn fetch_weather(city: String) -> Result<String, CacheError> { Ok(city) }
/// # #[tokio::main]
/// # async fn main() -> Result<(), CacheError> {
/// # let backend = Arc::new(InMemoryBackend::new());
/// # let engine = Arc::new(CacheEngine::init(CacheConfig::default(), backend)?);
/// let weather = Memoized::new(
///     engine,
///     |city: &String| format!("weather:{}", city),
///     Some(Duration::from_secs(600)),
///     fetch_weather,
/// );
/// let forecast = weather.call("berlin".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Memoized<V, A, K, F> {
    engine: Arc<CacheEngine<V>>,
    key_fn: K,
    ttl: Option<Duration>,
    f: F,
    _arg: PhantomData<fn(A)>,
}

impl<V, A, K, F> Memoized<V, A, K, F>
where
    V: CacheValue,
    K: Fn(&A) -> String,
{
    pub fn new(engine: Arc<CacheEngine<V>>, key_fn: K, ttl: Option<Duration>, f: F) -> Self {
        Self {
            engine,
            key_fn,
            ttl,
            f,
            _arg: PhantomData,
        }
    }

    pub fn key_for(&self, arg: &A) -> String {
        (self.key_fn)(arg)
    }

    pub async fn call<Fut, E>(&self, arg: A) -> Result<V, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: From<CacheError>,
    {
        let key = self.key_for(&arg);
        self.engine
            .get_or_insert_with(&key, self.ttl, || (self.f)(arg))
            .await
    }
}
