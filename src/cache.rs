use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use alloy::eips::BlockNumberOrTag;
use alloy::rpc::types::Log;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::ledger::{BlockHeader, LedgerClient, LogFilter};

/// Storage behind [`CachedLedgerClient`]. Entries are opaque log lists keyed by [`cache_key`].
pub trait LogCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<Log>>;
    fn put(&self, key: String, logs: Vec<Log>);
}

#[derive(Debug, Default)]
pub struct MemoryLogCache {
    entries: RwLock<HashMap<String, Vec<Log>>>,
}

impl MemoryLogCache {
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogCache for MemoryLogCache {
    fn get(&self, key: &str) -> Option<Vec<Log>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: String, logs: Vec<Log>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, logs);
    }
}

/// `{from}-{to}-{addr}-{addr}...`, addresses checksummed, deduplicated and sorted so the key
/// does not depend on input order. Topic filters are appended after `|`.
pub fn cache_key(filter: &LogFilter) -> String {
    let mut addresses: Vec<Address> = filter.addresses.clone();
    addresses.sort_unstable();
    addresses.dedup();

    let mut key = format!("{}-{}", filter.from_block, filter.to_block);
    for address in &addresses {
        key.push('-');
        key.push_str(&address.to_checksum(None));
    }

    if !filter.topics.is_empty() {
        let mut topics = filter.topics.clone();
        topics.sort_unstable();
        topics.dedup();

        key.push('|');
        let topics: Vec<String> = topics.iter().map(|topic| format!("{topic:?}")).collect();
        key.push_str(&topics.join(","));
    }

    key
}

/// Serves repeated `filter_logs` queries from a [`LogCache`]. Header and balance lookups always
/// go to the wrapped client; failed queries are never cached.
pub struct CachedLedgerClient<C, S> {
    inner: C,
    cache: S,
}

impl<C, S> CachedLedgerClient<C, S> {
    pub fn new(inner: C, cache: S) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &S {
        &self.cache
    }
}

#[async_trait]
impl<C: LedgerClient, S: LogCache> LedgerClient for CachedLedgerClient<C, S> {
    async fn header_at(&self, block: BlockNumberOrTag) -> Result<BlockHeader> {
        self.inner.header_at(block).await
    }

    async fn native_balance_at(&self, address: Address, block: u64) -> Result<U256> {
        self.inner.native_balance_at(address, block).await
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let key = cache_key(filter);
        if let Some(logs) = self.cache.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(logs);
        }

        let logs = self.inner.filter_logs(filter).await?;
        debug!("Cache miss for {}, storing {} logs", key, logs.len());
        self.cache.put(key, logs.clone());

        Ok(logs)
    }
}
