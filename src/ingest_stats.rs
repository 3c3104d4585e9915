use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct IngestStats {
    blocks: AtomicU64,
    transactions: AtomicU64,
    skipped_transactions: AtomicU64,
    failed_blocks: AtomicU64,
    failed_transactions: AtomicU64,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub const fn new() -> Self {
        Self {
            blocks: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            skipped_transactions: AtomicU64::new(0),
            failed_blocks: AtomicU64::new(0),
            failed_transactions: AtomicU64::new(0),
        }
    }

    pub fn inc_blocks(&self, n: u64) {
        self.blocks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_transactions(&self, n: u64) {
        self.transactions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_skipped_transactions(&self, n: u64) {
        self.skipped_transactions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_failed_blocks(&self, n: u64) {
        self.failed_blocks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_failed_transactions(&self, n: u64) {
        self.failed_transactions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            skipped_transactions: self.skipped_transactions.load(Ordering::Relaxed),
            failed_blocks: self.failed_blocks.load(Ordering::Relaxed),
            failed_transactions: self.failed_transactions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestSnapshot {
    pub blocks: u64,
    pub transactions: u64,
    pub skipped_transactions: u64,
    pub failed_blocks: u64,
    pub failed_transactions: u64,
}

pub static INGEST_STATS: IngestStats = IngestStats::new();
