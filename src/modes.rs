//! The three ingestion modes: catch-up, backfill and retry.
//!
//! Each mode resolves its block range up front. Anything that prevents that (node or
//! store unreachable, no resume point, pre-fee-market chain) is returned as an error and
//! aborts the run; once scanning starts, failures are only logged.

use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::chain::{ChainError, ChainReader};
use crate::config::Config;
use crate::ingest::{Ingestor, ScanDirection};
use crate::retry::{self, RetryFilter};
use crate::storage::Store;

/// Probes the node and rejects chains whose head block has no base fee.
pub async fn ensure_fee_market<C: ChainReader>(chain: &C) -> Result<u64> {
    let head = chain
        .head_number()
        .await
        .context("failed to get current head from rpc node")?;
    match chain.block_at(head).await {
        Ok(_) => Ok(head),
        Err(ChainError::MissingBaseFee(number)) => bail!(
            "head block {} has no base fee; pre-fee-market chains are not supported",
            number
        ),
        Err(err) => Err(err).with_context(|| format!("failed to get head block {}", head)),
    }
}

/// `[newest stored + 1, head - confirmations]`, as a closed-open range.
pub fn catch_up_range(
    latest_stored: Option<u64>,
    start_block: Option<u64>,
    head: u64,
    confirmations: u64,
) -> Result<Range<u64>> {
    let from = match (latest_stored, start_block) {
        (Some(latest), _) => latest.saturating_add(1),
        (None, Some(start)) => start,
        (None, None) => bail!("store holds no blocks and START_BLOCK is not set; no resume point"),
    };
    let to = head.saturating_sub(confirmations).saturating_add(1);
    Ok(from..to.max(from))
}

/// `[floor, oldest stored)`.
pub fn backfill_range(
    oldest_stored: Option<u64>,
    start_block: Option<u64>,
    floor: u64,
) -> Result<Range<u64>> {
    let to = match (oldest_stored, start_block) {
        (Some(oldest), _) => oldest,
        (None, Some(start)) => start,
        (None, None) => bail!("store holds no blocks and START_BLOCK is not set; no resume point"),
    };
    Ok(floor..to.max(floor))
}

pub async fn catch_up<C: ChainReader, S: Store>(
    ingestor: &Ingestor<C, S>,
    config: &Config,
    split: bool,
) -> Result<()> {
    let head = ensure_fee_market(ingestor.chain()).await?;
    let latest = ingestor
        .store()
        .latest_block_number()
        .await
        .context("failed to get last known block from database")?;
    let range = catch_up_range(latest, config.start_block, head, config.confirmations)?;
    if range.is_empty() {
        info!(head, "store is up to date with the chain head");
        return Ok(());
    }

    info!(from = range.start, to = range.end, split, "catching up");
    drive(ingestor, range, ScanDirection::Ascending, split).await;
    Ok(())
}

pub async fn backfill<C: ChainReader, S: Store>(
    ingestor: &Ingestor<C, S>,
    config: &Config,
    floor: u64,
    split: bool,
) -> Result<()> {
    ensure_fee_market(ingestor.chain()).await?;
    let oldest = ingestor
        .store()
        .oldest_block_number()
        .await
        .context("failed to get oldest known block from database")?;
    let range = backfill_range(oldest, config.start_block, floor)?;
    if range.is_empty() {
        info!(floor, "store already reaches the backfill floor");
        return Ok(());
    }

    info!(from = range.start, to = range.end, split, "backfilling");
    drive(ingestor, range, ScanDirection::Descending, split).await;
    Ok(())
}

/// Replays every failed block found in `log_path`, one singleton range each.
pub async fn retry<C: ChainReader, S: Store>(
    ingestor: &Ingestor<C, S>,
    log_path: &Path,
    filter: RetryFilter,
) -> Result<()> {
    ensure_fee_market(ingestor.chain()).await?;
    let file = File::open(log_path)
        .with_context(|| format!("failed to open old log file {:?}", log_path))?;
    let blocks = retry::failed_blocks(BufReader::new(file), filter)
        .with_context(|| format!("failed to read log file {:?}", log_path))?;

    info!(count = blocks.len(), ?filter, "replaying failed blocks");
    for number in blocks {
        ingestor
            .scan(number..number.saturating_add(1), ScanDirection::Ascending)
            .await;
    }
    Ok(())
}

async fn drive<C: ChainReader, S: Store>(
    ingestor: &Ingestor<C, S>,
    range: Range<u64>,
    direction: ScanDirection,
    split: bool,
) {
    if split {
        ingestor.scan_split(range).await;
    } else {
        ingestor.scan(range, direction).await;
    }
}
