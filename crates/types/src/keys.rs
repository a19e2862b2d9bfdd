//! Storage key schema (spec §3): individual block keys, compacted batch
//! keys, and the meta cursor key, plus the batch boundary math that both the
//! compactor and the firehose server rely on.

/// Width of a cold-tier batch. Configurable in principle (`batchWidth` in
/// §6), but the boundary arithmetic below assumes a fixed value per running
/// instance; changing it without re-compacting the whole cold tier would
/// violate the "exactly `BatchSize` contiguous heights" invariant.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

const HEIGHT_DIGITS: usize = 20;

/// Individual block key: `"block:"` + 20-digit zero-padded decimal height.
pub fn block_key(height: u64) -> String {
    format!("block:{height:0width$}", width = HEIGHT_DIGITS)
}

/// Compacted batch key: `"batch:"` + 20-digit start + `"-"` + 20-digit end.
pub fn batch_key(start: u64, end: u64) -> String {
    format!(
        "batch:{start:0width$}-{end:0width$}",
        width = HEIGHT_DIGITS
    )
}

/// Fixed key under which the meta cursor (last compacted batch end, as
/// big-endian 8 bytes) is stored.
pub const META_KEY: &str = "meta";

pub fn encode_meta(last_compacted_end: u64) -> [u8; 8] {
    last_compacted_end.to_be_bytes()
}

pub fn decode_meta(bytes: &[u8]) -> Option<u64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(array))
}

/// `BatchStart(n) = ((n-1)/BatchSize)*BatchSize + 1` (spec §3, 1-based
/// batches).
pub fn batch_start(height: u64, batch_size: u64) -> u64 {
    assert!(height >= 1, "heights are 1-based");
    ((height - 1) / batch_size) * batch_size + 1
}

/// `BatchEnd = BatchStart + BatchSize - 1`.
pub fn batch_end(start: u64, batch_size: u64) -> u64 {
    start + batch_size - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_key_is_zero_padded_to_twenty_digits() {
        assert_eq!(block_key(1), "block:00000000000000000001");
        assert_eq!(block_key(123_456), "block:00000000000000123456");
    }

    #[test]
    fn batch_key_pads_both_bounds() {
        assert_eq!(
            batch_key(1, 100),
            "batch:00000000000000000001-00000000000000000100"
        );
    }

    /// Spec §8 scenario 2: batch boundaries.
    #[test]
    fn batch_boundaries_match_the_literal_scenario() {
        assert_eq!(batch_start(1, 100), 1);
        assert_eq!(batch_start(100, 100), 1);
        assert_eq!(batch_start(101, 100), 101);
        assert_eq!(batch_start(250, 100), 201);
        assert_eq!(batch_end(201, 100), 300);
    }

    /// Spec §8 universal invariant: `BatchStart(BatchStart(h)) ==
    /// BatchStart(h)` and a batch covers exactly `BatchSize` heights.
    #[test]
    fn batch_start_is_idempotent_and_covers_exactly_batch_size() {
        for h in 1..=1000u64 {
            let start = batch_start(h, DEFAULT_BATCH_SIZE);
            assert_eq!(batch_start(start, DEFAULT_BATCH_SIZE), start);
            let end = batch_end(start, DEFAULT_BATCH_SIZE);
            assert_eq!(end - start + 1, DEFAULT_BATCH_SIZE);
        }
    }

    #[test]
    fn meta_round_trips_through_big_endian_bytes() {
        let encoded = encode_meta(123_456_789);
        assert_eq!(decode_meta(&encoded), Some(123_456_789));
    }
}
