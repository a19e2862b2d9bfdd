//! Background compactor (spec §4.7). Grounded on the teacher's pattern of
//! running periodic maintenance as a detached `tokio::spawn` task driven by
//! a `tokio::time::interval` (the same shape `L1Watcher::run` uses for its
//! poll loop, adapted here from a fixed poll action to a conditional
//! migration of hot blocks into a compressed cold batch).

use evmingest_codec::compress;
use evmingest_storage::{BlockStore, BlockStoreError};
use evmingest_types::keys::{batch_end, batch_start, DEFAULT_BATCH_SIZE};
use evmingest_types::NormalizedBlock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("storage error: {0}")]
    Storage(#[from] BlockStoreError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("codec error: {0}")]
    Codec(#[from] evmingest_codec::CodecError),
}

pub struct Compactor {
    store: Arc<dyn BlockStore>,
    batch_size: u64,
    min_blocks_before_compaction: u64,
}

impl Compactor {
    pub fn new(store: Arc<dyn BlockStore>, batch_size: u64, min_blocks_before_compaction: u64) -> Self {
        Self {
            store,
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
            min_blocks_before_compaction,
        }
    }

    /// Runs the tick loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, check_interval: Duration, cancel: CancellationToken) {
        let mut timer = tokio::time::interval(check_interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "compaction tick failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One compaction attempt (spec §4.7 tick algorithm):
    /// 1. Resolve the next candidate batch start from `meta` (self-healing:
    ///    falls back to `firstBlock` if `meta` is absent, covering a crash
    ///    between `SaveBatch`/`DeleteBlockRange` and `SaveMeta`).
    /// 2. Only proceed if the candidate batch is fully aligned to
    ///    `batchSize` and the hot tier holds at least
    ///    `minBlocksBeforeCompaction` blocks past the candidate's end.
    /// 3. Read the batch's blocks, compress them, and persist
    ///    (`save_batch` + `delete_block_range` + `save_meta`) as one logical
    ///    unit.
    pub async fn tick(&self) -> Result<bool, CompactionError> {
        // Self-healing: `save_batch` always completes before
        // `delete_block_range`/`save_meta`, so if the process crashed after
        // those hot blocks were deleted but before `meta` recorded it, the
        // cold tier already has the batch and just needs `meta` repaired.
        // `first_block()` alone can't detect this (it simply reports a
        // later height once the hot blocks are gone), so the repair reads
        // the cold tier directly.
        let meta = match self.store.get_meta().await? {
            Some(end) => Some(end),
            None => match self.store.latest_batch().await? {
                Some(latest_cold_start) => {
                    let end = batch_end(latest_cold_start, self.batch_size);
                    self.store.save_meta(end).await?;
                    tracing::warn!(end, "repaired missing meta from existing cold batch");
                    return Ok(true);
                }
                None => None,
            },
        };

        let candidate_start = match meta {
            Some(last_compacted_end) => batch_start(last_compacted_end + 1, self.batch_size),
            None => match self.store.first_block().await? {
                Some(first) => {
                    let aligned = batch_start(first, self.batch_size);
                    // spec §4.7 step 2: a non-aligned leading prefix aligns
                    // itself as more blocks arrive; skip this tick instead
                    // of trying to compact a range we don't fully hold.
                    if first != aligned {
                        return Ok(false);
                    }
                    aligned
                }
                None => return Ok(false),
            },
        };
        let candidate_end = batch_end(candidate_start, self.batch_size);

        let Some(latest) = self.store.latest_block().await? else {
            return Ok(false);
        };
        if latest < candidate_end + self.min_blocks_before_compaction {
            return Ok(false);
        }

        let mut blocks = Vec::with_capacity(self.batch_size as usize);
        for height in candidate_start..=candidate_end {
            let raw = match self.store.get_block(height).await {
                Ok(raw) => raw,
                Err(BlockStoreError::NotFound) => {
                    // spec §4.7 step 4: the compactor is not authoritative
                    // about missing blocks; abort this tick and let the
                    // fetcher fill the gap before the next one.
                    tracing::warn!(height, "block missing during compaction window, aborting tick");
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            };
            let block: NormalizedBlock = serde_json::from_slice(&raw)?;
            blocks.push(block);
        }

        let json_lines: Vec<Vec<u8>> = blocks
            .iter()
            .map(NormalizedBlock::to_json_line)
            .collect::<Result<_, _>>()?;
        let compressed = compress(json_lines.iter().map(Vec::as_slice))?;

        self.store
            .save_batch(candidate_start, candidate_end, compressed)
            .await?;
        self.store
            .delete_block_range(candidate_start, candidate_end)
            .await?;
        self.store.save_meta(candidate_end).await?;

        tracing::info!(
            start = candidate_start,
            end = candidate_end,
            "compacted batch"
        );
        Ok(true)
    }
}
