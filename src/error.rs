use std::time::Duration;

use alloy_primitives::B256;

use crate::chunker::BlockRange;

pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Terminal failures of a balance scan. None of them is retried by the engine.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid block range: start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("native symbol {0} is also used by a tracked token")]
    SymbolConflict(String),

    #[error("malformed Transfer event in tx {}: {reason}", display_tx(.tx))]
    MalformedEvent { tx: Option<B256>, reason: String },

    #[error("ledger query failed{}: {source}", display_range(.range))]
    LedgerQuery {
        range: Option<BlockRange>,
        #[source]
        source: anyhow::Error,
    },

    #[error("balance scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("balance scan cancelled")]
    Cancelled,

    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl ScanError {
    pub fn malformed(tx: Option<B256>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            tx,
            reason: reason.into(),
        }
    }
}

fn display_range(range: &Option<BlockRange>) -> String {
    range
        .map(|range| format!(" for blocks {range}"))
        .unwrap_or_default()
}

fn display_tx(tx: &Option<B256>) -> String {
    tx.map(|hash| format!("{hash:?}"))
        .unwrap_or_else(|| "<pending>".to_string())
}
