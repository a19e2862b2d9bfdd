//! Compresses/decompresses a sequence of newline-delimited JSON frames
//! (spec §4.1). Grounded on the teacher's own state-snapshot codec
//! (`crates/core/src/node/in_memory.rs`'s `dump_state`/`load_state`, which
//! pipes `serde_json::to_vec` output through `flate2::write::GzEncoder` /
//! `flate2::read::GzDecoder` with `Compression::default()`).

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to compress frames: {0}")]
    Compress(#[source] std::io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Compresses `frames` into a single payload: each frame followed by a `\n`,
/// fed into a streaming gzip encoder, which is then closed.
///
/// Contract (spec §4.1): frames must not themselves contain a literal
/// newline byte. `NormalizedBlock::to_json_line` upholds this by always
/// using the compact (non-pretty) JSON writer.
pub fn compress<'a, I>(frames: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for frame in frames {
        encoder.write_all(frame).map_err(CodecError::Compress)?;
        encoder.write_all(b"\n").map_err(CodecError::Compress)?;
    }
    encoder.finish().map_err(CodecError::Compress)
}

/// Streams decompression of `payload` and splits the result on `\n`.
/// A trailing empty segment (produced by the final frame's terminating
/// newline) is skipped; no other empty segments are skipped, so an empty
/// frame in the middle of the stream round-trips faithfully.
pub fn decompress(payload: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut decoder = GzDecoder::new(payload);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(CodecError::Decompress)?;

    let mut frames: Vec<Vec<u8>> = decoded
        .split(|&b| b == b'\n')
        .map(|slice| slice.to_vec())
        .collect();
    if frames.last().map(|f| f.is_empty()).unwrap_or(false) {
        frames.pop();
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spec §8 universal invariant: `Decompress(Compress(frames)) ==
    /// frames` (round-trip, order preserved, byte-identical).
    #[test]
    fn round_trip_preserves_order_and_bytes() {
        let frames: Vec<&[u8]> = vec![br#"{"n":1}"#, br#"{"n":2}"#, br#"{"n":3}"#];
        let compressed = compress(frames.clone()).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, frames.iter().map(|f| f.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_compresses_to_an_empty_frame_list() {
        let compressed = compress(std::iter::empty()).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn single_frame_round_trips() {
        let frames: Vec<&[u8]> = vec![b"hello world"];
        let compressed = compress(frames.clone()).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed[0], b"hello world");
    }

    #[test]
    fn decompressing_garbage_returns_an_error() {
        let err = decompress(b"not a gzip stream");
        assert!(err.is_err());
    }
}
