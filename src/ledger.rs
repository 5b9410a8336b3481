use alloy::eips::BlockNumberOrTag;
use alloy::rpc::types::{Filter, Log};
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;

use crate::chunker::BlockRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
}

/// Log query over an inclusive block range, restricted to a set of emitting contracts.
///
/// `topics` holds alternatives for topic 0 (the event signature).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub from_block: u64,
    pub to_block: u64,
    pub topics: Vec<B256>,
}

impl LogFilter {
    pub fn new(addresses: Vec<Address>, range: BlockRange, topics: Vec<B256>) -> Self {
        Self {
            addresses,
            from_block: range.start,
            to_block: range.end,
            topics,
        }
    }

    pub fn range(&self) -> BlockRange {
        BlockRange {
            start: self.from_block,
            end: self.to_block,
        }
    }

    pub(crate) fn to_rpc_filter(&self, from_block: u64, to_block: u64) -> Filter {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .from_block(from_block)
            .to_block(to_block);

        if self.topics.is_empty() {
            filter
        } else {
            filter.event_signature(self.topics.clone())
        }
    }
}

/// Read access to the ledger. Decorators (caching, metrics) must keep the exact semantics of
/// the wrapped client.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `Latest` resolves to the current chain head.
    async fn header_at(&self, block: BlockNumberOrTag) -> Result<BlockHeader>;

    async fn native_balance_at(&self, address: Address, block: u64) -> Result<U256>;

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;
}
