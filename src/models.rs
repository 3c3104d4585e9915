use serde::Serialize;

/// The all-zero address stored as recipient of contract-creation transactions.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Normalized transaction row. Existence of a row marks the hash as processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRecord {
    pub hash: String,
    pub sender: String,
    pub recipient: String,
    pub is_contract: bool,
    pub gas_price: u64,
    pub gas_used: u64,
    /// Timestamp of the containing block, unix seconds.
    pub timestamp: u64,
}

/// Block row. Transactions are referenced by hash only, in block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub hash: String,
    pub number: u64,
    pub tx_hashes: Vec<String>,
    pub base_fee: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodCount {
    pub period: String,
    pub tx_count: i64,
}
