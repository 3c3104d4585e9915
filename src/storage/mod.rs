use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    FromRow, SqlitePool,
};

use crate::models::{BlockRecord, PeriodCount, TxRecord};

pub type DbPool = SqlitePool;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("value of column {0} does not fit the store's integer range")]
    OutOfRange(&'static str),
    #[error("failed to encode/decode tx_hashes: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persistence capability consumed by the ingestion engine.
///
/// "No row" answers are `Ok(None)`, never errors. Implementations must be safe for
/// concurrent callers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn latest_block_number(&self) -> Result<Option<u64>, StoreError>;

    async fn oldest_block_number(&self) -> Result<Option<u64>, StoreError>;

    async fn get_transaction(&self, hash: &str) -> Result<Option<TxRecord>, StoreError>;

    /// Idempotent: a second call with the same hash leaves the stored row untouched.
    async fn upsert_transaction(&self, tx: &TxRecord) -> Result<(), StoreError>;

    async fn insert_block(&self, block: &BlockRecord) -> Result<(), StoreError>;
}

/// `Store` over a SQLite pool. The pool hands out one connection per call, so
/// concurrent workers need no extra locking.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn latest_block_number(&self) -> Result<Option<u64>, StoreError> {
        latest_block_number(&self.pool).await
    }

    async fn oldest_block_number(&self) -> Result<Option<u64>, StoreError> {
        oldest_block_number(&self.pool).await
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<TxRecord>, StoreError> {
        get_transaction(&self.pool, hash).await
    }

    async fn upsert_transaction(&self, tx: &TxRecord) -> Result<(), StoreError> {
        insert_transaction(&self.pool, tx).await
    }

    async fn insert_block(&self, block: &BlockRecord) -> Result<(), StoreError> {
        insert_block(&self.pool, block).await
    }
}

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {}", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS txs (
            hash TEXT PRIMARY KEY NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            is_contract BOOLEAN NOT NULL,
            gas_price INTEGER NOT NULL,
            gas_used INTEGER NOT NULL,
            timestamp INTEGER NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            hash TEXT PRIMARY KEY NOT NULL,
            number INTEGER NOT NULL,
            tx_hashes TEXT NOT NULL,
            base_fee INTEGER NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks(number);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_txs_timestamp ON txs(timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn insert_block(pool: &SqlitePool, block: &BlockRecord) -> Result<(), StoreError> {
    let tx_hashes = serde_json::to_string(&block.tx_hashes)?;
    sqlx::query(
        r#"
        INSERT INTO blocks (hash, number, tx_hashes, base_fee)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(hash) DO NOTHING;
        "#,
    )
    .bind(&block.hash)
    .bind(to_i64(block.number, "number")?)
    .bind(tx_hashes)
    .bind(to_i64(block.base_fee, "base_fee")?)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_transaction(pool: &SqlitePool, tx: &TxRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO txs (
            hash, sender, recipient, is_contract, gas_price, gas_used, timestamp
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(hash) DO NOTHING;
        "#,
    )
    .bind(&tx.hash)
    .bind(&tx.sender)
    .bind(&tx.recipient)
    .bind(tx.is_contract)
    .bind(to_i64(tx.gas_price, "gas_price")?)
    .bind(to_i64(tx.gas_used, "gas_used")?)
    .bind(to_i64(tx.timestamp, "timestamp")?)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(FromRow)]
struct TxRow {
    hash: String,
    sender: String,
    recipient: String,
    is_contract: bool,
    gas_price: i64,
    gas_used: i64,
    timestamp: i64,
}

impl TryFrom<TxRow> for TxRecord {
    type Error = StoreError;

    fn try_from(row: TxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: row.hash,
            sender: row.sender,
            recipient: row.recipient,
            is_contract: row.is_contract,
            gas_price: to_u64(row.gas_price, "gas_price")?,
            gas_used: to_u64(row.gas_used, "gas_used")?,
            timestamp: to_u64(row.timestamp, "timestamp")?,
        })
    }
}

pub async fn get_transaction(pool: &SqlitePool, hash: &str) -> Result<Option<TxRecord>, StoreError> {
    let row = sqlx::query_as::<_, TxRow>(
        r#"
        SELECT hash, sender, recipient, is_contract, gas_price, gas_used, timestamp
        FROM txs
        WHERE hash = ?1;
        "#,
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    row.map(TxRecord::try_from).transpose()
}

pub async fn count_transactions(pool: &SqlitePool) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM txs;")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// All rows stored for height `number`; more than one only after a reorg.
pub async fn get_blocks_by_number(
    pool: &SqlitePool,
    number: u64,
) -> Result<Vec<BlockRecord>, StoreError> {
    #[derive(FromRow)]
    struct Row {
        hash: String,
        number: i64,
        tx_hashes: String,
        base_fee: i64,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"
        SELECT hash, number, tx_hashes, base_fee
        FROM blocks
        WHERE number = ?1
        ORDER BY hash;
        "#,
    )
    .bind(to_i64(number, "number")?)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<BlockRecord, StoreError> {
            Ok(BlockRecord {
                hash: row.hash,
                number: to_u64(row.number, "number")?,
                tx_hashes: serde_json::from_str(&row.tx_hashes)?,
                base_fee: to_u64(row.base_fee, "base_fee")?,
            })
        })
        .collect()
}

pub async fn latest_block_number(pool: &SqlitePool) -> Result<Option<u64>, StoreError> {
    let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(number) FROM blocks;")
        .fetch_one(pool)
        .await?;
    max.map(|n| to_u64(n, "number")).transpose()
}

pub async fn oldest_block_number(pool: &SqlitePool) -> Result<Option<u64>, StoreError> {
    let min = sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(number) FROM blocks;")
        .fetch_one(pool)
        .await?;
    min.map(|n| to_u64(n, "number")).transpose()
}

pub async fn get_txs_per_day(pool: &SqlitePool, limit: i64) -> Result<Vec<PeriodCount>, StoreError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT date(timestamp, 'unixepoch') AS day, COUNT(*) AS tx_count
        FROM txs
        GROUP BY day
        ORDER BY day DESC
        LIMIT ?1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .rev()
        .map(|(period, tx_count)| PeriodCount { period, tx_count })
        .collect())
}

pub async fn get_txs_per_month(pool: &SqlitePool) -> Result<Vec<PeriodCount>, StoreError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT strftime('%Y-%m', timestamp, 'unixepoch') AS month, COUNT(*) AS tx_count
        FROM txs
        GROUP BY month
        ORDER BY month ASC;
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(period, tx_count)| PeriodCount { period, tx_count })
        .collect())
}

fn to_i64(value: u64, column: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(column))
}

fn to_u64(value: i64, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange(column))
}
