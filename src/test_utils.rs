#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, Bytes, LogData, U256};
use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::chunker::BlockRange;
use crate::events::{Transfer, TransferEvent};
use crate::ledger::{BlockHeader, LedgerClient, LogFilter};

pub fn addr(byte: u8) -> Address {
    Address::with_last_byte(byte)
}

pub fn raw_log(contract: Address, topics: Vec<B256>, data: Bytes) -> Log {
    Log {
        inner: alloy_primitives::Log {
            address: contract,
            data: LogData::new_unchecked(topics, data),
        },
        ..Default::default()
    }
}

pub fn transfer_log(token: Address, from: Address, to: Address, amount: u64, block: u64) -> Log {
    let mut log = raw_log(
        token,
        vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
        Bytes::copy_from_slice(&U256::from(amount).to_be_bytes::<32>()),
    );
    log.block_number = Some(block);
    log.transaction_hash = Some(B256::left_padding_from(&block.to_be_bytes()));
    log
}

pub fn transfer_event(from: Address, to: Address, amount: u64) -> TransferEvent {
    TransferEvent {
        token_contract: addr(0xaa),
        from,
        to,
        amount: U256::from(amount),
        tx_hash: None,
        block_number: None,
    }
}

/// Scripted ledger: answers `filter_logs` from a fixed log set, with optional failures and
/// per-range delays keyed by the range start.
#[derive(Debug, Default)]
pub struct MockLedger {
    latest: u64,
    native_balance: U256,
    logs: Vec<Log>,
    failing_blocks: HashSet<u64>,
    delays: HashMap<u64, Duration>,
    header_calls: AtomicUsize,
    filter_calls: AtomicUsize,
    in_flight: AtomicUsize,
    queried: Mutex<Vec<BlockRange>>,
}

impl MockLedger {
    pub fn new(latest: u64) -> Self {
        Self {
            latest,
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<Log>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_native_balance(mut self, balance: U256) -> Self {
        self.native_balance = balance;
        self
    }

    /// Any query whose range contains `block` fails.
    pub fn fail_at(mut self, block: u64) -> Self {
        self.failing_blocks.insert(block);
        self
    }

    pub fn delay_at(mut self, range_start: u64, delay: Duration) -> Self {
        self.delays.insert(range_start, delay);
        self
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }

    pub fn filter_calls(&self) -> usize {
        self.filter_calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn queried_ranges(&self) -> Vec<BlockRange> {
        let mut ranges = self.queried.lock().unwrap().clone();
        ranges.sort_by_key(|range| range.start);
        ranges
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn header_at(&self, block: BlockNumberOrTag) -> Result<BlockHeader> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        match block {
            BlockNumberOrTag::Latest => Ok(BlockHeader {
                number: self.latest,
            }),
            BlockNumberOrTag::Number(number) if number <= self.latest => Ok(BlockHeader { number }),
            other => Err(anyhow!("block {other} not found")),
        }
    }

    async fn native_balance_at(&self, _address: Address, block: u64) -> Result<U256> {
        if block > self.latest {
            return Err(anyhow!("block {block} not found"));
        }
        Ok(self.native_balance)
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let _guard = InFlight::enter(&self.in_flight);
        self.filter_calls.fetch_add(1, Ordering::SeqCst);
        let range = filter.range();
        self.queried.lock().unwrap().push(range);

        if let Some(delay) = self.delays.get(&range.start) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing_blocks.iter().any(|block| range.contains(*block)) {
            return Err(anyhow!("upstream error for {range}"));
        }

        Ok(self
            .logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|block| range.contains(block)))
            // no address restriction means every contract, as on a real node
            .filter(|log| filter.addresses.is_empty() || filter.addresses.contains(&log.address()))
            .filter(|log| {
                filter.topics.is_empty()
                    || log
                        .topics()
                        .first()
                        .is_some_and(|topic| filter.topics.contains(topic))
            })
            .cloned()
            .collect())
    }
}
