use crate::{BlockStore, BlockStoreError};
use async_trait::async_trait;
use evmingest_types::keys::{batch_key, block_key, decode_meta, encode_meta, META_KEY};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const BLOCK_PREFIX: &[u8] = b"block:";
const BATCH_PREFIX: &[u8] = b"batch:";

/// A host-provided ordered key-value view (spec §4.2 "Transactional
/// backend"). Exposes only forward iteration — this is the one constraint
/// that forces [`TransactionalBlockStore`] to maintain its own `latestHot`
/// cache rather than asking the store for a native `Last()`. Writes
/// accumulate in a host-owned staging buffer; they become durable only when
/// the host commits its own transaction, which is outside this crate's
/// control (spec §4.2, §9).
pub trait HostKvView: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockStoreError>;
    fn put(&self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&self, key: Vec<u8>);
    /// Forward-only iteration over all keys with the given prefix, in key
    /// order, reflecting both committed data and this view's own staged
    /// writes.
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;
}

/// Wraps a [`HostKvView`] and adds the `latestHot` cache the view cannot
/// provide natively (spec §4.2, §9).
pub struct TransactionalBlockStore<V: HostKvView> {
    view: Arc<V>,
    latest_hot: AtomicU64,
    has_hot: AtomicBool,
}

impl<V: HostKvView> TransactionalBlockStore<V> {
    /// Primes the `latestHot` cache with one forward scan over the `block:`
    /// key space (spec §4.2: "initialized by one forward scan at startup").
    pub fn new(view: Arc<V>) -> Result<Self, BlockStoreError> {
        let mut latest = 0u64;
        let mut has_hot = false;
        for (key, _) in view.iter_prefix(BLOCK_PREFIX) {
            has_hot = true;
            latest = parse_height(&key, BLOCK_PREFIX)?;
        }
        Ok(Self {
            view,
            latest_hot: AtomicU64::new(latest),
            has_hot: AtomicBool::new(has_hot),
        })
    }
}

fn parse_height(key: &[u8], prefix: &[u8]) -> Result<u64, BlockStoreError> {
    let s = std::str::from_utf8(key).map_err(|e| BlockStoreError::Io(e.to_string()))?;
    let prefix = std::str::from_utf8(prefix).unwrap();
    let digits = s
        .strip_prefix(prefix)
        .ok_or_else(|| BlockStoreError::Io(format!("malformed key {s}")))?;
    digits
        .parse::<u64>()
        .map_err(|e| BlockStoreError::Io(e.to_string()))
}

#[async_trait]
impl<V: HostKvView> BlockStore for TransactionalBlockStore<V> {
    async fn save_block(&self, height: u64, bytes: Vec<u8>) -> Result<(), BlockStoreError> {
        // Staged only: the `latestHot` cache is intentionally *not* bumped
        // here. Bumping it now would let a reader observe a height that a
        // subsequently-aborted host transaction rolls back. The cache only
        // advances in `note_committed_height`, called by the accept-hook
        // driver after the host commit it observed has succeeded.
        self.view.put(block_key(height).into_bytes(), bytes);
        Ok(())
    }

    async fn get_block(&self, height: u64) -> Result<Vec<u8>, BlockStoreError> {
        self.view
            .get(block_key(height).as_bytes())?
            .ok_or(BlockStoreError::NotFound)
    }

    async fn first_block(&self) -> Result<Option<u64>, BlockStoreError> {
        match self.view.iter_prefix(BLOCK_PREFIX).next() {
            Some((key, _)) => Ok(Some(parse_height(&key, BLOCK_PREFIX)?)),
            None => Ok(None),
        }
    }

    async fn latest_block(&self) -> Result<Option<u64>, BlockStoreError> {
        if self.has_hot.load(Ordering::SeqCst) {
            Ok(Some(self.latest_hot.load(Ordering::SeqCst)))
        } else {
            Ok(None)
        }
    }

    async fn delete_block_range(&self, lo: u64, hi: u64) -> Result<(), BlockStoreError> {
        // O(n) explicit deletes into the staged batch (spec §4.2: "driven
        // by background compaction" so this cost is acceptable).
        for height in lo..=hi {
            self.view.delete(block_key(height).into_bytes());
        }
        Ok(())
    }

    async fn save_batch(&self, start: u64, end: u64, bytes: Vec<u8>) -> Result<(), BlockStoreError> {
        self.view.put(batch_key(start, end).into_bytes(), bytes);
        Ok(())
    }

    async fn get_batch_compressed(&self, start: u64) -> Result<Vec<u8>, BlockStoreError> {
        let prefix = format!("batch:{start:020}-");
        match self.view.iter_prefix(prefix.as_bytes()).next() {
            Some((_, value)) => Ok(value),
            None => Err(BlockStoreError::NotFound),
        }
    }

    async fn first_batch(&self) -> Result<Option<u64>, BlockStoreError> {
        match self.view.iter_prefix(BATCH_PREFIX).next() {
            Some((key, _)) => Ok(Some(parse_batch_start(&key)?)),
            None => Ok(None),
        }
    }

    async fn latest_batch(&self) -> Result<Option<u64>, BlockStoreError> {
        let mut last = None;
        for (key, _) in self.view.iter_prefix(BATCH_PREFIX) {
            last = Some(key);
        }
        match last {
            Some(key) => Ok(Some(parse_batch_start(&key)?)),
            None => Ok(None),
        }
    }

    async fn get_meta(&self) -> Result<Option<u64>, BlockStoreError> {
        Ok(self.view.get(META_KEY.as_bytes())?.and_then(|b| decode_meta(&b)))
    }

    async fn save_meta(&self, height: u64) -> Result<(), BlockStoreError> {
        self.view.put(META_KEY.as_bytes().to_vec(), encode_meta(height).to_vec());
        Ok(())
    }

    async fn note_committed_height(&self, height: u64) {
        self.latest_hot.fetch_max(height, Ordering::SeqCst);
        self.has_hot.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        // Does not own the underlying store; closing is a no-op (spec
        // §4.2: "Closing a non-owned view is a no-op.").
    }
}

fn parse_batch_start(key: &[u8]) -> Result<u64, BlockStoreError> {
    let s = std::str::from_utf8(key).map_err(|e| BlockStoreError::Io(e.to_string()))?;
    let rest = s
        .strip_prefix("batch:")
        .ok_or_else(|| BlockStoreError::Io(format!("malformed batch key {s}")))?;
    let start = rest
        .split('-')
        .next()
        .ok_or_else(|| BlockStoreError::Io(format!("malformed batch key {s}")))?;
    start
        .parse::<u64>()
        .map_err(|e| BlockStoreError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// An in-memory stand-in for a host-managed ordered store, used only to
    /// exercise `TransactionalBlockStore` against the `HostKvView` contract.
    #[derive(Default)]
    struct FakeHostView {
        data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    }

    impl HostKvView for FakeHostView {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BlockStoreError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        fn put(&self, key: Vec<u8>, value: Vec<u8>) {
            self.data.lock().unwrap().insert(key, value);
        }

        fn delete(&self, key: Vec<u8>) {
            self.data.lock().unwrap().remove(&key);
        }

        fn iter_prefix<'a>(
            &'a self,
            prefix: &[u8],
        ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
            let snapshot: Vec<_> = self
                .data
                .lock()
                .unwrap()
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Box::new(snapshot.into_iter())
        }
    }

    #[tokio::test]
    async fn save_block_does_not_bump_the_cache_until_commit_is_observed() {
        let view = Arc::new(FakeHostView::default());
        let store = TransactionalBlockStore::new(view).unwrap();

        store.save_block(7, b"payload".to_vec()).await.unwrap();
        // Staged write is readable (host hasn't rolled back)...
        assert_eq!(store.get_block(7).await.unwrap(), b"payload");
        // ...but the cache hasn't advanced, because no commit was observed.
        assert_eq!(store.latest_block().await.unwrap(), None);

        store.note_committed_height(7).await;
        assert_eq!(store.latest_block().await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn latest_hot_cache_primes_from_a_forward_scan_at_construction() {
        let view = Arc::new(FakeHostView::default());
        view.put(block_key(3).into_bytes(), vec![]);
        view.put(block_key(9).into_bytes(), vec![]);
        view.put(block_key(5).into_bytes(), vec![]);

        let store = TransactionalBlockStore::new(view).unwrap();
        assert_eq!(store.latest_block().await.unwrap(), Some(9));
        assert_eq!(store.first_block().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn note_committed_height_never_moves_the_cache_backwards() {
        let view = Arc::new(FakeHostView::default());
        let store = TransactionalBlockStore::new(view).unwrap();
        store.note_committed_height(10).await;
        store.note_committed_height(4).await;
        assert_eq!(store.latest_block().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn batch_and_meta_round_trip_through_the_host_view() {
        let view = Arc::new(FakeHostView::default());
        let store = TransactionalBlockStore::new(view).unwrap();
        store.save_batch(1, 100, b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get_batch_compressed(1).await.unwrap(), b"payload");
        store.save_meta(100).await.unwrap();
        assert_eq!(store.get_meta().await.unwrap(), Some(100));
    }
}
