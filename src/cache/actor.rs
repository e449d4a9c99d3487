//! Cache Unit Module
//!
//! A cache unit is a tokio task that owns the bound fetcher. Every call on a
//! [`Cache`] handle is a message in the unit's mailbox, so fetches and fetcher
//! swaps against one unit are processed strictly in order.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::fetcher::SharedFetcher;
use crate::cache::MAILBOX_CAPACITY;
use crate::error::{ContentCacheError, Result};

// == Messages ==
enum Command<K, V> {
    Fetch {
        slug: K,
        reply: oneshot::Sender<Result<Option<V>>>,
    },
    SetFetcher {
        fetcher: Option<SharedFetcher<K, V>>,
        reply: oneshot::Sender<()>,
    },
    IsBound {
        reply: oneshot::Sender<bool>,
    },
}

// == Cache Handle ==
/// Handle to a cache unit.
///
/// Cloning is cheap; all clones address the same unit. Separate calls to
/// [`Cache::start`] create fully independent units.
pub struct Cache<K, V> {
    mailbox: mpsc::Sender<Command<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    // == Start ==
    /// Spawns a new unit on the current tokio runtime holding `initial`.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(initial: Option<SharedFetcher<K, V>>) -> Self {
        let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run(inbox, initial));
        Self { mailbox }
    }

    // == Fetch ==
    /// Invokes the bound fetcher with `slug`.
    ///
    /// Returns `Ok(None)` when no fetcher is bound. Fetcher failures are
    /// returned to the caller unchanged.
    pub async fn fetch(&self, slug: K) -> Result<Option<V>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Fetch { slug, reply }).await?;
        response.await.map_err(|_| ContentCacheError::CacheClosed)?
    }

    // == Set Fetcher ==
    /// Replaces the bound fetcher; `None` unbinds it.
    ///
    /// Fetches queued before this call use the old fetcher, later ones the new.
    pub async fn set_fetcher(&self, fetcher: Option<SharedFetcher<K, V>>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetFetcher { fetcher, reply }).await?;
        response.await.map_err(|_| ContentCacheError::CacheClosed)
    }

    /// Whether a fetcher is currently bound.
    pub async fn is_bound(&self) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::IsBound { reply }).await?;
        response.await.map_err(|_| ContentCacheError::CacheClosed)
    }

    async fn send(&self, command: Command<K, V>) -> Result<()> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| ContentCacheError::CacheClosed)
    }
}

// == Unit Loop ==
async fn run<K, V>(mut inbox: mpsc::Receiver<Command<K, V>>, initial: Option<SharedFetcher<K, V>>) {
    let mut fetcher = initial;
    debug!("Cache unit started (fetcher bound: {})", fetcher.is_some());

    while let Some(command) = inbox.recv().await {
        match command {
            Command::Fetch { slug, reply } => {
                let result = match &fetcher {
                    Some(bound) => bound.fetch(slug).await,
                    None => Ok(None),
                };
                if let Err(e) = &result {
                    warn!("Fetcher failed: {}", e);
                }
                // The caller may have stopped waiting
                let _ = reply.send(result);
            }
            Command::SetFetcher { fetcher: next, reply } => {
                info!(
                    "Fetcher {}",
                    if next.is_some() { "replaced" } else { "unbound" }
                );
                fetcher = next;
                let _ = reply.send(());
            }
            Command::IsBound { reply } => {
                let _ = reply.send(fetcher.is_some());
            }
        }
    }

    debug!("Cache unit stopped");
}
