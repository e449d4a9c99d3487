//! Fetch-Through Module
//!
//! A fetcher that puts a [`Store`] in front of an upstream fetcher. Content it
//! has already seen is served again without touching the upstream as long as
//! the store reports the slug unchanged since it was last checked.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::fetcher::{FetchFuture, Fetcher, SharedFetcher};
use crate::cache::stats::FetchStats;
use crate::error::Result;
use crate::store::{Content, SinceLookup, Slug, Store};

#[derive(Clone)]
struct Known<V> {
    content: V,
    checked_at: DateTime<Utc>,
}

struct State<K, V> {
    known: HashMap<K, Known<V>>,
    stats: FetchStats,
}

struct Inner<K, V> {
    store: Store<K, V>,
    upstream: SharedFetcher<K, V>,
    state: Mutex<State<K, V>>,
}

// == Fetch Through ==
/// Store-backed fetcher wrapping an upstream source.
///
/// Cloning is cheap; clones share known content and statistics.
pub struct FetchThrough<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for FetchThrough<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Slug, V: Content> FetchThrough<K, V> {
    pub fn new(store: Store<K, V>, upstream: SharedFetcher<K, V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                upstream,
                state: Mutex::new(State {
                    known: HashMap::new(),
                    stats: FetchStats::new(),
                }),
            }),
        }
    }

    /// This fetcher as a value a cache unit can bind.
    pub fn shared(&self) -> SharedFetcher<K, V> {
        Arc::new(self.clone())
    }

    /// Snapshot of the hit/miss counters.
    pub async fn stats(&self) -> FetchStats {
        self.inner.state.lock().await.stats.clone()
    }

    // == Fetch Through ==
    async fn fetch_through(&self, slug: K) -> Result<Option<V>> {
        let known = self.inner.state.lock().await.known.get(&slug).cloned();

        if let Some(known) = known {
            let lookup = self.inner.store.get_since(&slug, Some(known.checked_at)).await;
            if let Some(SinceLookup::Unchanged) = lookup {
                debug!("{:?} unchanged since {}", slug, known.checked_at);
                self.inner.state.lock().await.stats.record_hit();
                return Ok(Some(known.content));
            }
        }

        self.inner.state.lock().await.stats.record_miss();

        let fetched = match self.inner.upstream.fetch(slug.clone()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.inner.state.lock().await.stats.record_upstream_failure();
                return Err(e);
            }
        };

        match &fetched {
            Some(content) => {
                let stamp = self.inner.store.set(slug.clone(), content.clone()).await?;
                // Only our own write is older than this; any later one is stamped at or after it
                let known = Known {
                    content: content.clone(),
                    checked_at: stamp + Duration::microseconds(1),
                };
                self.inner.state.lock().await.known.insert(slug, known);
            }
            None => {
                debug!("{:?} has no upstream content", slug);
                self.inner.state.lock().await.known.remove(&slug);
            }
        }

        Ok(fetched)
    }
}

impl<K: Slug, V: Content> Fetcher<K, V> for FetchThrough<K, V> {
    fn fetch(&self, slug: K) -> FetchFuture<'_, V> {
        Box::pin(self.fetch_through(slug))
    }
}
