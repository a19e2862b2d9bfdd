use crate::hex_quantity::HexU64;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// An event log entry, 0-4 indexed topics per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "logIndex")]
    pub log_index: HexU64,
    pub removed: bool,
}

/// One receipt per transaction, aligned by index with `block.transactions`
/// and `traces` (spec §3 alignment invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: B256,
    #[serde(rename = "gasUsed")]
    pub gas_used: U256,
    #[serde(rename = "cumulativeGasUsed")]
    pub cumulative_gas_used: U256,
    /// 0 (reverted) or 1 (success).
    pub status: HexU64,
    #[serde(rename = "contractAddress")]
    pub contract_address: Option<Address>,
    #[serde(rename = "effectiveGasPrice")]
    pub effective_gas_price: U256,
    pub logs: Vec<Log>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_u64() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_zero_is_failure_one_is_success() {
        let mut receipt = sample_receipt();
        receipt.status = HexU64(0);
        assert!(!receipt.succeeded());
        receipt.status = HexU64(1);
        assert!(receipt.succeeded());
    }

    fn sample_receipt() -> Receipt {
        Receipt {
            transaction_hash: B256::ZERO,
            gas_used: U256::from(21000u64),
            cumulative_gas_used: U256::from(21000u64),
            status: HexU64(1),
            contract_address: None,
            effective_gas_price: U256::from(1u64),
            logs: Vec::new(),
        }
    }
}
