use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Log;
use alloy::transports::TransportResult;
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ledger::{BlockHeader, LedgerClient, LogFilter};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const MAX_RESULTS_ERROR: &str = "exceeds max results";

#[derive(Clone)]
struct Endpoint {
    url: String,
    provider: AlloyFullProvider,
}

/// JSON-RPC ledger client over one or more HTTP endpoints.
///
/// A call that fails or stalls moves the client to the next endpoint and is retried there
/// with backoff, up to `rpc_max_retries` times.
#[derive(Clone)]
pub struct RpcClient {
    endpoints: Arc<[Endpoint]>,
    active: Arc<AtomicUsize>,
    max_retries: usize,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], config: &Config) -> Result<Self> {
        if rpc_urls.is_empty() {
            bail!("no JSON-RPC endpoint configured");
        }

        let endpoints = rpc_urls
            .iter()
            .map(|url| -> Result<Endpoint> {
                let parsed = url
                    .parse()
                    .with_context(|| format!("cannot parse JSON-RPC endpoint {url:?}"))?;
                Ok(Endpoint {
                    url: url.clone(),
                    provider: ProviderBuilder::new().connect_http(parsed),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RpcClient {
            endpoints: endpoints.into(),
            active: Arc::new(AtomicUsize::new(0)),
            max_retries: config.rpc_max_retries,
            request_timeout: config.rpc_request_timeout,
        })
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    pub fn active_url(&self) -> &str {
        &self.endpoint().url
    }

    /// Moves every subsequent call to the next configured endpoint.
    pub fn fail_over(&self) {
        if self.endpoints.len() < 2 {
            return;
        }
        let next = (self.active.fetch_add(1, Ordering::Relaxed) + 1) % self.endpoints.len();
        debug!("Switching to JSON-RPC endpoint {}", self.endpoints[next].url);
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn call_failed(&self, reason: &str) -> anyhow::Error {
        warn!("JSON-RPC call to {} failed: {}", self.active_url(), reason);
        self.fail_over();
        anyhow!("{reason}")
    }

    fn call_timed_out(&self) -> anyhow::Error {
        warn!(
            "No answer from {} within {:?}",
            self.active_url(),
            self.request_timeout
        );
        self.fail_over();
        anyhow!("no answer within {:?}", self.request_timeout)
    }

    /// Runs `call` against the active endpoint, bounded by the request timeout and retried
    /// with backoff. A "max results" answer is handed back untouched, only a smaller range helps.
    async fn request<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(AlloyFullProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let attempt = || {
            let pending = call(self.endpoint().provider.clone());
            async move {
                match timeout(self.request_timeout, pending).await {
                    Ok(Ok(value)) => Ok(Ok(value)),
                    Ok(Err(e)) if e.to_string().contains(MAX_RESULTS_ERROR) => {
                        Ok(Err(anyhow!("{e}")))
                    }
                    Ok(Err(e)) => Err(self.call_failed(&e.to_string())),
                    Err(_) => Err(self.call_timed_out()),
                }
            }
        };

        Retry::spawn(self.backoff(), attempt).await?
    }

    /// End block of the leading sub-range the node is willing to answer for a query starting at
    /// `from`, taken from its "retry with the range A-B" hint.
    fn split_point(error: &str, from: u64) -> Option<u64> {
        if !error.contains(MAX_RESULTS_ERROR) {
            return None;
        }

        let hint = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = hint.captures(error)?;
        let start: u64 = captures.get(1)?.as_str().parse().ok()?;
        let end: u64 = captures.get(2)?.as_str().parse().ok()?;

        (start == from && end >= from).then_some(end)
    }

    async fn fetch_logs(&self, filter: &LogFilter, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let rpc_filter = filter.to_rpc_filter(from_block, to_block);
        self.request(|provider| {
            let rpc_filter = rpc_filter.clone();
            async move { provider.get_logs(&rpc_filter).await }
        })
        .await
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn header_at(&self, block: BlockNumberOrTag) -> Result<BlockHeader> {
        let number = match block {
            BlockNumberOrTag::Latest => {
                self.request(|provider| async move { provider.get_block_number().await })
                    .await?
            }
            _ => {
                self.request(|provider| async move { provider.get_block_by_number(block).await })
                    .await?
                    .with_context(|| format!("block {block} not found"))?
                    .header
                    .number
            }
        };

        Ok(BlockHeader { number })
    }

    async fn native_balance_at(&self, address: Address, block: u64) -> Result<U256> {
        self.request(|provider| async move {
            provider
                .get_balance(address)
                .block_id(BlockId::number(block))
                .await
        })
        .await
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut logs = Vec::new();
        let mut from = filter.from_block;

        while from <= filter.to_block {
            let end = match self.fetch_logs(filter, from, filter.to_block).await {
                Ok(batch) => {
                    logs.extend(batch);
                    break;
                }
                Err(e) => match Self::split_point(&e.to_string(), from) {
                    Some(end) => end,
                    None => return Err(e),
                },
            };

            info!(
                "Too many logs in blocks {}-{}, fetching {}-{} on its own",
                from, filter.to_block, from, end
            );
            logs.extend(self.fetch_logs(filter, from, end).await?);
            from = end + 1;
        }

        Ok(logs)
    }
}
