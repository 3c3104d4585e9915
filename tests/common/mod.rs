#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, Transaction, H160, H256, U256};
use ethers_providers::ProviderError;
use tracing_subscriber::layer::SubscriberExt;

use rust_eth_ingest::chain::{ChainBlock, ChainError, ChainReader, ReceiptInfo};
use rust_eth_ingest::storage::{self, DbPool};
use rust_eth_ingest::telemetry;

pub const GAS_USED: u64 = 21_000;
pub const BASE_FEE: u64 = 7;

/// In-memory node with switchable failures and call counters.
#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<HashMap<u64, ChainBlock>>,
    failing_blocks: Mutex<HashSet<u64>>,
    legacy_blocks: Mutex<HashSet<u64>>,
    receipts: Mutex<HashMap<H256, u64>>,
    code: Mutex<HashMap<Address, Bytes>>,
    failing_code: Mutex<HashSet<Address>>,
    head: AtomicU64,
    fetched: Mutex<Vec<u64>>,
    pub receipt_calls: AtomicUsize,
    pub sender_calls: AtomicUsize,
    pub code_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block, a receipt for each of its transactions, and moves the head.
    pub fn add_block(&self, block: ChainBlock) {
        let mut receipts = self.receipts.lock().unwrap();
        for tx in &block.transactions {
            receipts.insert(tx.hash, GAS_USED);
        }
        self.head.fetch_max(block.number, Ordering::SeqCst);
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn fail_block(&self, number: u64) {
        self.failing_blocks.lock().unwrap().insert(number);
    }

    pub fn heal_block(&self, number: u64) {
        self.failing_blocks.lock().unwrap().remove(&number);
    }

    pub fn make_legacy(&self, number: u64) {
        self.legacy_blocks.lock().unwrap().insert(number);
    }

    pub fn drop_receipt(&self, tx_hash: H256) {
        self.receipts.lock().unwrap().remove(&tx_hash);
    }

    pub fn restore_receipt(&self, tx_hash: H256) {
        self.receipts.lock().unwrap().insert(tx_hash, GAS_USED);
    }

    pub fn set_code(&self, address: Address, code: &[u8]) {
        self.code
            .lock()
            .unwrap()
            .insert(address, Bytes::from(code.to_vec()));
    }

    /// Makes every code lookup for `address` fail at the transport.
    pub fn fail_code(&self, address: Address) {
        self.failing_code.lock().unwrap().insert(address);
    }

    /// Heights requested so far, in request order.
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn enrichment_calls(&self) -> (usize, usize, usize) {
        (
            self.receipt_calls.load(Ordering::SeqCst),
            self.sender_calls.load(Ordering::SeqCst),
            self.code_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_at(&self, number: u64) -> Result<ChainBlock, ChainError> {
        self.fetched.lock().unwrap().push(number);
        if self.failing_blocks.lock().unwrap().contains(&number) {
            return Err(ChainError::Transport(ProviderError::CustomError(
                "connection reset by peer".to_string(),
            )));
        }
        if self.legacy_blocks.lock().unwrap().contains(&number) {
            return Err(ChainError::MissingBaseFee(number));
        }
        self.blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {}", number)))
    }

    async fn receipt_for(&self, tx_hash: H256) -> Result<ReceiptInfo, ChainError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.receipts
            .lock()
            .unwrap()
            .get(&tx_hash)
            .map(|gas_used| ReceiptInfo {
                gas_used: *gas_used,
            })
            .ok_or_else(|| ChainError::NotFound(format!("receipt for {:#x}", tx_hash)))
    }

    /// Unsigned (zero `from`) transactions fail recovery.
    fn sender_of(&self, tx: &Transaction) -> Result<Address, ChainError> {
        self.sender_calls.fetch_add(1, Ordering::SeqCst);
        if tx.from.is_zero() {
            return Err(ChainError::Malformed("missing signature".to_string()));
        }
        Ok(tx.from)
    }

    async fn code_at(&self, address: Address, _block_number: u64) -> Result<Bytes, ChainError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_code.lock().unwrap().contains(&address) {
            return Err(ChainError::Transport(ProviderError::CustomError(
                "request timed out".to_string(),
            )));
        }
        Ok(self
            .code
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn head_number(&self) -> Result<u64, ChainError> {
        Ok(self.head.load(Ordering::SeqCst))
    }
}

pub fn addr(seed: u64) -> Address {
    H160::from_low_u64_be(seed)
}

pub fn tx(seed: u64, from: Address, to: Option<Address>) -> Transaction {
    let mut tx = Transaction::default();
    tx.hash = H256::from_low_u64_be(seed);
    tx.from = from;
    tx.to = to;
    tx.gas_price = Some(U256::from(1_000u64 + seed));
    tx
}

pub fn block(number: u64, transactions: Vec<Transaction>) -> ChainBlock {
    ChainBlock {
        hash: H256::from_low_u64_be(0xb10c_0000 + number),
        number,
        timestamp: 1_700_000_000 + number * 12,
        base_fee: BASE_FEE,
        transactions,
    }
}

pub fn hex(hash: H256) -> String {
    format!("0x{:x}", hash)
}

pub fn temp_db_url() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir();
    let _ = std::fs::create_dir_all(&dir);
    let file = format!(
        "rust_eth_ingest_test_{}_{}_{}.sqlite",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );
    let path = dir.join(file);
    format!("sqlite://{}", path.to_string_lossy())
}

pub async fn temp_pool() -> DbPool {
    storage::init_pool(&temp_db_url()).await.unwrap()
}

/// Shared in-memory sink for the JSON log layer.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Routes this thread's events through the production JSON layer into a buffer.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber =
        tracing_subscriber::registry().with(telemetry::json_layer(move || writer.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
