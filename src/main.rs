mod cli;

use anyhow::Context;
use clap::Parser;

use rust_eth_ingest::api::{self, AppState};
use rust_eth_ingest::chain::EthClient;
use rust_eth_ingest::config::Config;
use rust_eth_ingest::ingest::Ingestor;
use rust_eth_ingest::retry::RetryFilter;
use rust_eth_ingest::storage::{self, DbPool, SqliteStore};
use rust_eth_ingest::{modes, telemetry};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let _log_guard = telemetry::init_tracing(config.log_file.as_deref())?;

    let pool = storage::init_pool(&config.database_url)
        .await
        .context("failed to connect to db")?;

    match cli.command {
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            api::run_http_server(&bind, AppState { pool }).await?;
        }
        Commands::CatchUp { split } => {
            let ingestor = build_ingestor(&config, pool)?;
            modes::catch_up(&ingestor, &config, split).await?;
        }
        Commands::Backfill { floor, split } => {
            let ingestor = build_ingestor(&config, pool)?;
            let floor = floor.unwrap_or(config.backfill_floor);
            modes::backfill(&ingestor, &config, floor, split).await?;
        }
        Commands::Retry {
            log,
            include_tx_failures,
        } => {
            let ingestor = build_ingestor(&config, pool)?;
            let filter = if include_tx_failures {
                RetryFilter::AllFailures
            } else {
                RetryFilter::BlockFailures
            };
            modes::retry(&ingestor, &log, filter).await?;
        }
    }

    Ok(())
}

fn build_ingestor(config: &Config, pool: DbPool) -> anyhow::Result<Ingestor<EthClient, SqliteStore>> {
    let client = EthClient::new(&config.eth_rpc_url).context("failed to connect to rpc endpoint")?;
    Ok(Ingestor::new(client, SqliteStore::new(pool)))
}
