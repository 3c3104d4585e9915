//! Tracing setup and the failure markers written into the structured log.
//!
//! Failure events are `ERROR` events carrying a `block` number, a `failure` marker and,
//! for transaction-level failures, the `tx` hash. The JSON sink flattens these fields to
//! the top level of each line so that retry mode can read them back.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        format::{Format, Json, JsonFields},
        MakeWriter,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BlockFetch,
    BlockRejected,
    BlockInsert,
    TxLookup,
    TxReceipt,
    TxSender,
    TxCode,
    TxMalformed,
    TxInsert,
}

impl FailureKind {
    pub const ALL: [FailureKind; 9] = [
        FailureKind::BlockFetch,
        FailureKind::BlockRejected,
        FailureKind::BlockInsert,
        FailureKind::TxLookup,
        FailureKind::TxReceipt,
        FailureKind::TxSender,
        FailureKind::TxCode,
        FailureKind::TxMalformed,
        FailureKind::TxInsert,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::BlockFetch => "block_fetch",
            FailureKind::BlockRejected => "block_rejected",
            FailureKind::BlockInsert => "block_insert",
            FailureKind::TxLookup => "tx_lookup",
            FailureKind::TxReceipt => "tx_receipt",
            FailureKind::TxSender => "tx_sender",
            FailureKind::TxCode => "tx_code",
            FailureKind::TxMalformed => "tx_malformed",
            FailureKind::TxInsert => "tx_insert",
        }
    }

    pub fn parse(marker: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == marker)
    }

    /// Block-level failures leave the whole block row missing.
    pub const fn is_block_level(self) -> bool {
        matches!(
            self,
            FailureKind::BlockFetch | FailureKind::BlockRejected | FailureKind::BlockInsert
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type JsonLayer<S, W> = tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>;

/// Newline-delimited JSON with event fields flattened next to `level` and `timestamp`.
pub fn json_layer<S, W>(make_writer: W) -> JsonLayer<S, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(make_writer)
}

/// Console output for humans, plus a JSON file sink when `log_file` is set.
///
/// The returned guard flushes the file sink on drop and must outlive the run.
pub fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating log directory {:?}", dir))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(json_layer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
