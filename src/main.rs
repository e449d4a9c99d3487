//! Content Cache - demo binary
//!
//! Serves the slugs named on the command line through a fetch-through cache
//! whose upstream is a directory of files, one file per slug.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use content_cache::cache::fetcher::{self, SharedFetcher};
use content_cache::{spawn_compaction_task, Cache, Config, FetchThrough, Store};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Start the content store (bounded wait for table readiness)
/// 4. Start background log compaction
/// 5. Bind a fetch-through fetcher into a cache unit
/// 6. Fetch every slug given on the command line
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: data_dir={}, node={}, replicas={:?}, source_dir={}",
        config.data_dir.display(),
        config.node_name,
        config.replica_nodes,
        config.source_dir.display()
    );

    let store: Store<String, String> = Store::start(config.store_config())
        .await
        .context("content store failed to start")?;

    let compaction_handle = spawn_compaction_task(store.clone(), config.compaction_interval);

    let through = FetchThrough::new(store, directory_upstream(config.source_dir.clone()));
    let cache = Cache::start(Some(through.shared()));

    for slug in std::env::args().skip(1) {
        match cache.fetch(slug.clone()).await {
            Ok(Some(content)) => println!("{}", content),
            Ok(None) => warn!("No content for '{}'", slug),
            Err(e) => warn!("Fetching '{}' failed: {}", slug, e),
        }
    }

    let stats = through.stats().await;
    info!(
        "Done: {} hits, {} misses, {} upstream failures",
        stats.hits, stats.misses, stats.upstream_failures
    );

    compaction_handle.abort();
    Ok(())
}

/// Upstream that reads `<source_dir>/<slug>`; a missing file is absent content.
fn directory_upstream(source_dir: PathBuf) -> SharedFetcher<String, String> {
    fetcher::from_async_fn(move |slug: String| read_slug(source_dir.clone(), slug))
}

async fn read_slug(source_dir: PathBuf, slug: String) -> content_cache::Result<Option<String>> {
    // Slugs name files directly under the source directory
    if slug.is_empty() || slug.contains(['/', '\\']) || slug == ".." {
        return Ok(None);
    }

    let path = source_dir.join(&slug);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("reading {}", path.display()))
            .into()),
    }
}
