use std::fmt;
use std::ops::Range;

use ethers_core::types::{Address, Transaction};
use futures_util::future;
use tracing::{error, info, info_span, Instrument};

use crate::chain::{self, ChainBlock, ChainError, ChainReader};
use crate::ingest_stats::{IngestSnapshot, IngestStats, INGEST_STATS};
use crate::models::{BlockRecord, TxRecord};
use crate::storage::Store;
use crate::telemetry::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Ascending,
    Descending,
}

impl ScanDirection {
    /// Heights of the closed-open `range` in visiting order.
    pub fn heights(self, range: Range<u64>) -> Box<dyn Iterator<Item = u64> + Send> {
        match self {
            ScanDirection::Ascending => Box::new(range),
            ScanDirection::Descending => Box::new(range.rev()),
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanDirection::Ascending => f.write_str("ascending"),
            ScanDirection::Descending => f.write_str("descending"),
        }
    }
}

/// Why a single transaction could not be enriched.
#[derive(thiserror::Error, Debug)]
pub enum EnrichError {
    #[error("couldn't retrieve tx receipt: {0}")]
    Receipt(#[source] ChainError),
    #[error("couldn't get tx sender: {0}")]
    Sender(#[source] ChainError),
    #[error("failed to get recipient's code: {0}")]
    Code(#[source] ChainError),
    #[error("transaction carries no gas price representable as u64")]
    MissingGasPrice,
}

impl EnrichError {
    pub fn failure(&self) -> FailureKind {
        match self {
            EnrichError::Receipt(_) => FailureKind::TxReceipt,
            EnrichError::Sender(_) => FailureKind::TxSender,
            EnrichError::Code(_) => FailureKind::TxCode,
            EnrichError::MissingGasPrice => FailureKind::TxMalformed,
        }
    }
}

/// Counters for a single scan. Every increment also lands in [`INGEST_STATS`].
#[derive(Default)]
struct ScanStats(IngestStats);

impl ScanStats {
    fn block_stored(&self) {
        self.0.inc_blocks(1);
        INGEST_STATS.inc_blocks(1);
    }

    fn failed_block(&self) {
        self.0.inc_failed_blocks(1);
        INGEST_STATS.inc_failed_blocks(1);
    }

    fn tx_stored(&self) {
        self.0.inc_transactions(1);
        INGEST_STATS.inc_transactions(1);
    }

    fn tx_skipped(&self) {
        self.0.inc_skipped_transactions(1);
        INGEST_STATS.inc_skipped_transactions(1);
    }

    fn failed_tx(&self) {
        self.0.inc_failed_transactions(1);
        INGEST_STATS.inc_failed_transactions(1);
    }
}

/// Walks block ranges and copies blocks and their transactions into the store.
///
/// Holds no state between calls: any number of scans may run concurrently against the
/// same chain and store. Failures never escape a scan; they are logged (see
/// [`crate::telemetry`]) and leave the affected rows absent so a later pass retries them.
pub struct Ingestor<C, S> {
    chain: C,
    store: S,
}

impl<C: ChainReader, S: Store> Ingestor<C, S> {
    pub fn new(chain: C, store: S) -> Self {
        Self { chain, store }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingests every block in `range` one at a time, in `direction` order.
    pub async fn scan(&self, range: Range<u64>, direction: ScanDirection) {
        let span = info_span!("scan", from = range.start, to = range.end, %direction);
        async move {
            info!("scan started");
            let stats = ScanStats::default();
            for number in direction.heights(range) {
                self.ingest_block(number, &stats)
                    .instrument(info_span!("block", block = number))
                    .await;
            }
            let IngestSnapshot {
                blocks,
                transactions,
                skipped_transactions,
                failed_blocks,
                failed_transactions,
            } = stats.0.snapshot();
            info!(
                blocks,
                transactions,
                skipped_transactions,
                failed_blocks,
                failed_transactions,
                "scan finished"
            );
        }
        .instrument(span)
        .await
    }

    /// Scans the newer half of `range` descending and the older half ascending,
    /// concurrently.
    pub async fn scan_split(&self, range: Range<u64>) {
        let (older, newer) = split_range(range);
        future::join(
            self.scan(newer, ScanDirection::Descending),
            self.scan(older, ScanDirection::Ascending),
        )
        .await;
    }

    async fn ingest_block(&self, number: u64, stats: &ScanStats) {
        info!("pulling block");
        let block = match self.chain.block_at(number).await {
            Ok(block) => block,
            Err(err) => {
                let failure = match &err {
                    ChainError::MissingBaseFee(_) => FailureKind::BlockRejected,
                    _ => FailureKind::BlockFetch,
                };
                error!(
                    block = number,
                    failure = failure.as_str(),
                    error = %err,
                    "failed to get block"
                );
                stats.failed_block();
                return;
            }
        };

        let mut record = BlockRecord {
            hash: chain::hash_to_lower_hex(block.hash),
            number: block.number,
            tx_hashes: Vec::with_capacity(block.transactions.len()),
            base_fee: block.base_fee,
        };

        for tx in &block.transactions {
            let tx_hash = chain::hash_to_lower_hex(tx.hash);
            // Membership is recorded even when the transaction itself is skipped.
            record.tx_hashes.push(tx_hash.clone());
            self.ingest_transaction(&block, tx, &tx_hash, stats)
                .instrument(info_span!("tx", tx = %tx_hash))
                .await;
        }
        info!(txs = record.tx_hashes.len(), "done saving tx data for block");

        match self.store.insert_block(&record).await {
            Ok(()) => stats.block_stored(),
            Err(err) => {
                error!(
                    block = number,
                    failure = FailureKind::BlockInsert.as_str(),
                    error = %err,
                    "failed to save block data"
                );
                stats.failed_block();
            }
        }
    }

    async fn ingest_transaction(
        &self,
        block: &ChainBlock,
        tx: &Transaction,
        tx_hash: &str,
        stats: &ScanStats,
    ) {
        match self.store.get_transaction(tx_hash).await {
            Ok(Some(_)) => {
                info!("tx already exists in our database, skipping");
                stats.tx_skipped();
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    block = block.number,
                    tx = tx_hash,
                    failure = FailureKind::TxLookup.as_str(),
                    error = %err,
                    "failed to retrieve tx data from database"
                );
                stats.failed_tx();
                return;
            }
        }

        info!("pulling tx data from node");
        let record = match self.enrich(block, tx, tx_hash).await {
            Ok(record) => record,
            Err(err) => {
                error!(
                    block = block.number,
                    tx = tx_hash,
                    failure = err.failure().as_str(),
                    error = %err,
                    "failed to get tx data"
                );
                stats.failed_tx();
                return;
            }
        };

        match self.store.upsert_transaction(&record).await {
            Ok(()) => stats.tx_stored(),
            Err(err) => {
                error!(
                    block = block.number,
                    tx = tx_hash,
                    failure = FailureKind::TxInsert.as_str(),
                    error = %err,
                    "failed to insert tx"
                );
                stats.failed_tx();
            }
        }
    }

    async fn enrich(
        &self,
        block: &ChainBlock,
        tx: &Transaction,
        tx_hash: &str,
    ) -> Result<TxRecord, EnrichError> {
        let receipt = self
            .chain
            .receipt_for(tx.hash)
            .await
            .map_err(EnrichError::Receipt)?;
        let sender = self.chain.sender_of(tx).map_err(EnrichError::Sender)?;
        let gas_price = chain::legacy_gas_price(tx).ok_or(EnrichError::MissingGasPrice)?;

        // Contract creations have no recipient and are never flagged as contract calls.
        let (recipient, is_contract) = match tx.to {
            None => (Address::zero(), false),
            Some(to) => {
                let code = self
                    .chain
                    .code_at(to, block.number)
                    .await
                    .map_err(EnrichError::Code)?;
                (to, !code.is_empty())
            }
        };

        Ok(TxRecord {
            hash: tx_hash.to_string(),
            sender: chain::address_to_lower_hex(sender),
            recipient: chain::address_to_lower_hex(recipient),
            is_contract,
            gas_price,
            gas_used: receipt.gas_used,
            timestamp: block.timestamp,
        })
    }
}

/// Splits `range` into `(older, newer)` halves; the older half takes the odd block.
pub fn split_range(range: Range<u64>) -> (Range<u64>, Range<u64>) {
    let len = range.end.saturating_sub(range.start);
    let mid = range.start + len.div_ceil(2);
    (range.start..mid, mid..range.end.max(mid))
}
