//! Accept-hook driver (spec §4.6): the seam between a host VM's per-block
//! "accept" hook and this crate's storage cache sequencing. Grounded on the
//! teacher's `crates/l1_sidecar` crate, which plays the same role — a thin
//! driver wiring an external event source into node-owned state without
//! owning that state's transaction itself.

use async_trait::async_trait;
use evmingest_fetcher::HeightFetch;
use evmingest_storage::{BlockStore, BlockStoreError};
use evmingest_types::NormalizedBlock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("storage error: {0}")]
    Storage(#[from] BlockStoreError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("host accept failed: {0}")]
    Host(String),
    #[error(
        "startup gap: lastAccepted ({last_accepted}) is ahead of lastIndexed ({last_indexed})"
    )]
    StartupGap {
        last_accepted: u64,
        last_indexed: u64,
    },
}

/// What a host VM plugin calls from its own per-block accept hook (spec
/// §4.6). Hosts embedding this crate as a plugin call
/// [`on_accepted`](AcceptHookDriver::on_accepted) for every height they
/// propose, in order; the driver itself drives the fetch-then-host-commit
/// sequence rather than assuming the caller already did.
#[async_trait]
pub trait AcceptHookDriver: Send + Sync {
    async fn on_accepted(&self, height: u64) -> Result<(), AcceptError>;
}

/// The host's own accept entry-point (spec §4.6 step 3): for the
/// transactional backend, calling this is what durably commits both chain
/// metadata and this crate's staged storage writes in one host transaction.
#[async_trait]
pub trait HostAccept: Send + Sync {
    async fn accept(&self, height: u64) -> Result<(), AcceptError>;
}

/// Notified once per height, strictly after the host commit has been
/// observed (spec §4.6 step 4, §4.8 "Notifications"). Kept as its own
/// trait rather than a direct dependency on `evmingest_firehose` so the
/// driver doesn't need to know which downstream server, if any, is
/// listening.
pub trait FirehoseNotify: Send + Sync {
    fn notify(&self, height: u64);
}

/// The reference driver (spec §4.6): on each accepted height, in order —
/// skip if already indexed (restart idempotence), run the fetcher's
/// per-block pipeline and persist it, call the host's own accept, then only
/// after that succeeds advance the cache and notify the firehose server.
/// Cache updates strictly follow the host commit so an aborted accept never
/// leaves a stale cache pointing at rolled-back data (spec §4.2, §9).
pub struct ReferenceAcceptHookDriver<F, H> {
    store: Arc<dyn BlockStore>,
    fetch: Arc<F>,
    host: Arc<H>,
    notify: Option<Arc<dyn FirehoseNotify>>,
    last_indexed: AtomicU64,
}

impl<F, H> ReferenceAcceptHookDriver<F, H>
where
    F: HeightFetch,
    H: HostAccept,
{
    pub fn new(
        store: Arc<dyn BlockStore>,
        fetch: Arc<F>,
        host: Arc<H>,
        notify: Option<Arc<dyn FirehoseNotify>>,
    ) -> Self {
        Self {
            store,
            fetch,
            host,
            notify,
            last_indexed: AtomicU64::new(0),
        }
    }

    /// Startup check (spec §4.6): a host reporting a `lastAccepted` height
    /// greater than what storage has actually indexed means the two have
    /// diverged — for example storage was restored from an older snapshot
    /// than the host's own state. Ingestion cannot safely resume in that
    /// state and must halt rather than silently skip the gap.
    pub async fn check_for_startup_gap(&self, last_accepted: u64) -> Result<(), AcceptError> {
        let last_indexed = self.store.latest_block().await?.unwrap_or(0);
        self.last_indexed.fetch_max(last_indexed, Ordering::SeqCst);
        if last_accepted > last_indexed {
            return Err(AcceptError::StartupGap {
                last_accepted,
                last_indexed,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<F, H> AcceptHookDriver for ReferenceAcceptHookDriver<F, H>
where
    F: HeightFetch,
    H: HostAccept,
{
    async fn on_accepted(&self, height: u64) -> Result<(), AcceptError> {
        // Restart idempotence (spec §4.6 step 1): a host that re-delivers
        // an already-indexed height (e.g. after a crash and replay) is a
        // no-op here, not an error.
        if height <= self.last_indexed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let normalized: NormalizedBlock = self
            .fetch
            .fetch(height)
            .await
            .map_err(|e| AcceptError::Fetch(e.to_string()))?;
        let bytes = normalized.to_json_line()?;
        self.store.save_block(height, bytes).await?;

        self.host
            .accept(height)
            .await
            .map_err(|e| AcceptError::Host(e.to_string()))?;

        // Only after the host's own commit succeeded: advance the cache
        // and tell anyone tailing the chain that `height` is now visible.
        self.store.note_committed_height(height).await;
        self.last_indexed.store(height, Ordering::SeqCst);
        if let Some(notify) = &self.notify {
            notify.notify(height);
        }
        Ok(())
    }
}

/// Standalone data-flow alternative (spec §2): with no host VM to hook
/// into, a free-standing loop consumes normalized blocks straight from the
/// fetcher, persists them to the direct backend, and advances the cache
/// immediately since there is no external transaction to wait on.
pub async fn run_standalone_loop(
    store: Arc<dyn BlockStore>,
    mut incoming: mpsc::Receiver<NormalizedBlock>,
    notify: Option<Arc<dyn FirehoseNotify>>,
    cancel: CancellationToken,
) -> Result<(), AcceptError> {
    loop {
        tokio::select! {
            next = incoming.recv() => {
                let Some(block) = next else { return Ok(()) };
                let height = block.height();
                let bytes = block.to_json_line()?;
                store.save_block(height, bytes).await?;
                store.note_committed_height(height).await;
                if let Some(notify) = &notify {
                    notify.notify(height);
                }
                tracing::debug!(height, "indexed block in standalone mode");
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}
