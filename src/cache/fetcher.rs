//! Fetcher Module
//!
//! The capability a cache unit invokes to produce content for a slug.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a, V> = Pin<Box<dyn Future<Output = Result<Option<V>>> + Send + 'a>>;

/// A fetcher shared between a cache unit and whoever bound it.
pub type SharedFetcher<K, V> = Arc<dyn Fetcher<K, V>>;

// == Fetcher Trait ==
/// Produces content for a slug, possibly by reaching an upstream source.
///
/// `Ok(None)` means the slug has no content. Failures are returned as
/// [`ContentCacheError::Fetcher`](crate::error::ContentCacheError::Fetcher).
pub trait Fetcher<K, V>: Send + Sync {
    fn fetch(&self, slug: K) -> FetchFuture<'_, V>;
}

// == Closure Adapters ==
struct SyncFn<F, K, V> {
    f: F,
    _types: PhantomData<fn(K) -> V>,
}

impl<F, K, V> Fetcher<K, V> for SyncFn<F, K, V>
where
    F: Fn(K) -> Result<Option<V>> + Send + Sync,
    K: Send + 'static,
    V: Send + 'static,
{
    fn fetch(&self, slug: K) -> FetchFuture<'_, V> {
        let result = (self.f)(slug);
        Box::pin(async move { result })
    }
}

struct AsyncFn<F, K, V> {
    f: F,
    _types: PhantomData<fn(K) -> V>,
}

impl<F, Fut, K, V> Fetcher<K, V> for AsyncFn<F, K, V>
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    fn fetch(&self, slug: K) -> FetchFuture<'_, V> {
        Box::pin((self.f)(slug))
    }
}

/// Wraps a synchronous closure as a fetcher.
///
/// ```ignore
/// let fixed = fetcher::from_fn(|_slug: String| Ok(Some("FOO".to_string())));
/// ```
pub fn from_fn<K, V, F>(f: F) -> SharedFetcher<K, V>
where
    F: Fn(K) -> Result<Option<V>> + Send + Sync + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    Arc::new(SyncFn {
        f,
        _types: PhantomData,
    })
}

/// Wraps a closure returning a future as a fetcher.
pub fn from_async_fn<K, V, F, Fut>(f: F) -> SharedFetcher<K, V>
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    Arc::new(AsyncFn {
        f,
        _types: PhantomData,
    })
}
