//! Dual-tier storage engine (spec §4.2): one capability set, two backends.
//! [`DirectBlockStore`] wraps an embedded `rocksdb` instance;
//! [`TransactionalBlockStore`] wraps a host-supplied [`HostKvView`] whose
//! writes join an external transaction. Both implement [`BlockStore`].

mod direct;
mod transactional;

pub use direct::DirectBlockStore;
pub use transactional::{HostKvView, TransactionalBlockStore};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    /// A point lookup found nothing. Distinct from `Io` per spec §4.2's
    /// "Lookup misses return a sentinel distinct from I/O errors."
    #[error("not found")]
    NotFound,
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// One capability set shared by both storage backends (spec §4.2).
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert/overwrite the hot key for `h`.
    async fn save_block(&self, height: u64, bytes: Vec<u8>) -> Result<(), BlockStoreError>;

    /// Point lookup of the hot key for `h`.
    async fn get_block(&self, height: u64) -> Result<Vec<u8>, BlockStoreError>;

    /// Smallest hot key, if any.
    async fn first_block(&self) -> Result<Option<u64>, BlockStoreError>;

    /// Greatest hot key, if any (served from cache on the transactional
    /// backend).
    async fn latest_block(&self) -> Result<Option<u64>, BlockStoreError>;

    /// Removes hot keys for `[lo, hi]` as a single write batch.
    async fn delete_block_range(&self, lo: u64, hi: u64) -> Result<(), BlockStoreError>;

    /// Writes the cold key covering `[start, end]`.
    async fn save_batch(&self, start: u64, end: u64, bytes: Vec<u8>) -> Result<(), BlockStoreError>;

    /// Point lookup of the cold key whose start is `start`.
    async fn get_batch_compressed(&self, start: u64) -> Result<Vec<u8>, BlockStoreError>;

    /// Smallest cold-tier batch start, if any.
    async fn first_batch(&self) -> Result<Option<u64>, BlockStoreError>;

    /// Greatest cold-tier batch start, if any.
    async fn latest_batch(&self) -> Result<Option<u64>, BlockStoreError>;

    /// Reads the last compacted batch end.
    async fn get_meta(&self) -> Result<Option<u64>, BlockStoreError>;

    /// Writes the last compacted batch end.
    async fn save_meta(&self, height: u64) -> Result<(), BlockStoreError>;

    /// `latestHot - firstHot + 1` if the hot tier is non-empty, else 0.
    async fn block_count(&self) -> Result<u64, BlockStoreError> {
        match (self.first_block().await?, self.latest_block().await?) {
            (Some(first), Some(latest)) if latest >= first => Ok(latest - first + 1),
            _ => Ok(0),
        }
    }

    /// Called by the accept-hook driver strictly after a host commit it
    /// observed has succeeded, so that the `latestHot` cache never reflects
    /// a write rolled back by an aborted transaction (spec §4.2, §4.6, §9).
    /// A no-op on backends that have no separate cache (the direct
    /// backend updates inline in `save_block`).
    async fn note_committed_height(&self, _height: u64) {}

    /// Releases owned resources. A no-op on a view that does not own the
    /// underlying store (the transactional backend).
    fn close(&self);
}
