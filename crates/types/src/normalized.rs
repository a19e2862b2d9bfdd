use crate::block::Block;
use crate::receipt::Receipt;
use crate::trace::TraceResult;
use serde::{Deserialize, Serialize};

/// The unit the fetcher produces and storage persists: one block plus its
/// aligned receipts and traces (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBlock {
    pub block: Block,
    pub receipts: Vec<Receipt>,
    pub traces: Vec<TraceResult>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AlignmentError {
    #[error(
        "receipts length {receipts} does not match transactions length {transactions} at block {height}"
    )]
    ReceiptsMismatch {
        height: u64,
        transactions: usize,
        receipts: usize,
    },
    #[error(
        "traces length {traces} does not match transactions length {transactions} at block {height}"
    )]
    TracesMismatch {
        height: u64,
        transactions: usize,
        traces: usize,
    },
}

impl NormalizedBlock {
    /// The alignment invariant from spec §3: `len(receipts) == len(traces)
    /// == len(block.transactions)`, all indexed identically.
    pub fn check_alignment(&self) -> Result<(), AlignmentError> {
        let height = self.block.number();
        let tx_count = self.block.transactions.len();
        if self.receipts.len() != tx_count {
            return Err(AlignmentError::ReceiptsMismatch {
                height,
                transactions: tx_count,
                receipts: self.receipts.len(),
            });
        }
        if self.traces.len() != tx_count {
            return Err(AlignmentError::TracesMismatch {
                height,
                transactions: tx_count,
                traces: self.traces.len(),
            });
        }
        Ok(())
    }

    pub fn height(&self) -> u64 {
        self.block.number()
    }

    /// Encodes as a single compact (non-pretty) JSON line, the unit the
    /// codec treats as one frame (spec §4.1 contract: "Frames must not
    /// themselves contain a literal newline byte").
    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockHeader};
    use crate::hex_quantity::HexU64;
    use alloy_primitives::B256;

    fn empty_block(height: u64) -> Block {
        Block {
            header: BlockHeader {
                hash: B256::ZERO,
                number: HexU64(height),
                timestamp: HexU64(0),
                parent_hash: B256::ZERO,
            },
            transactions: Vec::new(),
        }
    }

    #[test]
    fn alignment_holds_for_empty_block() {
        let normalized = NormalizedBlock {
            block: empty_block(1),
            receipts: Vec::new(),
            traces: Vec::new(),
        };
        assert!(normalized.check_alignment().is_ok());
    }

    #[test]
    fn alignment_rejects_receipts_length_mismatch() {
        let normalized = NormalizedBlock {
            block: empty_block(5),
            receipts: vec![],
            traces: vec![],
        };
        assert!(normalized.check_alignment().is_ok());

        let mut mismatched = normalized.clone();
        mismatched.traces.push(None);
        assert_eq!(
            mismatched.check_alignment(),
            Err(AlignmentError::TracesMismatch {
                height: 5,
                transactions: 0,
                traces: 1
            })
        );
    }

    #[test]
    fn json_line_never_contains_a_newline_byte() {
        let normalized = NormalizedBlock {
            block: empty_block(42),
            receipts: Vec::new(),
            traces: Vec::new(),
        };
        let line = normalized.to_json_line().unwrap();
        assert!(!line.contains(&b'\n'));
    }
}
