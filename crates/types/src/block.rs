use crate::hex_quantity::HexU64;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// One ordered transaction inside a block, per spec §3's `block.transactions`
/// entry shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas: U256,
    #[serde(rename = "gasPrice")]
    pub gas_price: U256,
    #[serde(rename = "maxFeePerGas", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(
        rename = "maxPriorityFeePerGas",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<U256>,
    pub input: Bytes,
    pub nonce: HexU64,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: HexU64,
    #[serde(rename = "type")]
    pub tx_type: HexU64,
    #[serde(rename = "blockHash")]
    pub block_hash: B256,
    #[serde(rename = "blockNumber")]
    pub block_number_hex: HexU64,
    #[serde(rename = "blockTimestamp")]
    pub block_timestamp_hex: HexU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: B256,
    pub number: HexU64,
    pub timestamp: HexU64,
    #[serde(rename = "parentHash")]
    pub parent_hash: B256,
}

/// `block.transactions` is always returned in full (the fetcher always
/// requests `includeTransactions=true`, spec §4.5 step 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number.as_u64()
    }
}
