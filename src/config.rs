use std::env;
use std::path::PathBuf;

/// Floor used by backfill when `BACKFILL_FLOOR` is not set.
pub const DEFAULT_BACKFILL_FLOOR: u64 = 2_000_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub eth_rpc_url: String,
    pub database_url: String,
    pub http_bind_addr: String,
    pub backfill_floor: u64,
    /// Resume point when the store holds no blocks yet.
    pub start_block: Option<u64>,
    pub confirmations: u64,
    pub log_file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing ETH_RPC_URL env var")]
    MissingEthRpcUrl,
    #[error("{var} must be an unsigned integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let eth_rpc_url = env::var("ETH_RPC_URL").map_err(|_| ConfigError::MissingEthRpcUrl)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/ingest.db".to_string());
        let http_bind_addr = env::var("HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let backfill_floor = parse_u64_var("BACKFILL_FLOOR")?.unwrap_or(DEFAULT_BACKFILL_FLOOR);
        let start_block = parse_u64_var("START_BLOCK")?;
        let confirmations = parse_u64_var("CONFIRMATIONS")?.unwrap_or(0);
        let log_file = env::var("LOG_FILE")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            eth_rpc_url,
            database_url,
            http_bind_addr,
            backfill_floor,
            start_block,
            confirmations,
            log_file,
        })
    }
}

fn parse_u64_var(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) => parse_u64(var, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .replace('_', "")
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        })
}
