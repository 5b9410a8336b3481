use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy_primitives::Address;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::accumulator::{BalanceAccumulator, BalanceMap};
use crate::error::{ScanError, ScanResult};
use crate::ledger::LedgerClient;
use crate::registry::TokenRegistry;
use crate::scanner::{ScanConfig, ScanCoordinator};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Reserved key the native currency balance is reported under.
    pub native_symbol: String,
    pub timeout: Duration,
    pub scan: ScanConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            native_symbol: "ETH".to_string(),
            timeout: DEFAULT_TIMEOUT,
            scan: ScanConfig::default(),
        }
    }
}

/// Balance of the native currency plus every tracked token for one address, as of the chain
/// head observed when the request started.
pub struct BalanceService<C> {
    client: Arc<C>,
    registry: Arc<TokenRegistry>,
    coordinator: ScanCoordinator<C>,
    config: ServiceConfig,
}

impl<C: LedgerClient + 'static> BalanceService<C> {
    /// Fails when a tracked token reports under the native symbol, its balance would be
    /// overwritten by the native one.
    pub fn new(client: Arc<C>, registry: TokenRegistry, config: ServiceConfig) -> ScanResult<Self> {
        if registry.symbols().any(|symbol| symbol == config.native_symbol) {
            return Err(ScanError::SymbolConflict(config.native_symbol));
        }

        let registry = Arc::new(registry);
        let coordinator = ScanCoordinator::new(client.clone(), registry.clone(), config.scan.clone());

        Ok(Self {
            client,
            registry,
            coordinator,
            config,
        })
    }

    /// Returns raw integer balances keyed by symbol.
    ///
    /// Every tracked symbol is present. The whole request is bounded by the configured timeout;
    /// on expiry the scan is cancelled and drained before [`ScanError::Timeout`] is returned.
    #[instrument(skip(self, cancel))]
    pub async fn get_balances(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> ScanResult<BalanceMap> {
        let address = parse_address(address)?;
        let scan_token = cancel.child_token();

        let operation = self.collect_balances(&scan_token, address);
        tokio::pin!(operation);

        tokio::select! {
            result = &mut operation => result,
            _ = sleep(self.config.timeout) => {
                warn!("Balance lookup for {} exceeded {:?}, cancelling", address, self.config.timeout);
                scan_token.cancel();
                let _ = operation.await;
                Err(ScanError::Timeout(self.config.timeout))
            }
        }
    }

    async fn collect_balances(
        &self,
        cancel: &CancellationToken,
        address: Address,
    ) -> ScanResult<BalanceMap> {
        // one head for the whole request, a moving target would make the result irreproducible
        let header = cancellable(cancel, self.client.header_at(BlockNumberOrTag::Latest))
            .await?
            .map_err(|source| ScanError::LedgerQuery {
                range: None,
                source: source.context("fetching latest block header"),
            })?;
        let height = header.number;
        info!("Computing balances of {} at block {}", address, height);

        let native = cancellable(cancel, self.client.native_balance_at(address, height))
            .await?
            .map_err(|source| ScanError::LedgerQuery {
                range: None,
                source: source.context(format!(
                    "retrieving {} balance at block {}",
                    self.config.native_symbol, height
                )),
            })?;

        let accumulator = Arc::new(BalanceAccumulator::with_symbols(self.registry.symbols()));
        self.coordinator
            .scan_into(cancel, address, height, accumulator.clone())
            .await?;
        accumulator.apply_native_balance(&self.config.native_symbol, native)?;

        let balances = accumulator.snapshot();
        balances.warn_negative(address, height);

        info!("Total balances of {}: {:?}", address, balances);
        Ok(balances)
    }
}

/// Parses a hex account address. Any casing is accepted; comparisons happen on raw bytes.
pub fn parse_address(address: &str) -> ScanResult<Address> {
    Address::from_str(address.trim()).map_err(|_| ScanError::InvalidAddress(address.to_string()))
}

async fn cancellable<T>(cancel: &CancellationToken, future: impl Future<Output = T>) -> ScanResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        value = future => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{I256, U256};

    use super::*;
    use crate::test_utils::{MockLedger, addr, transfer_log};

    const TARGET: &str = "0x0000000000000000000000000000000000000042";

    fn registry() -> TokenRegistry {
        [(addr(0xa1), "XES"), (addr(0xb2), "MKR"), (addr(0xc3), "BAT")]
            .into_iter()
            .collect()
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            scan: ScanConfig {
                chunk_size: 100,
                workers: 4,
                request_delay: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    fn service(ledger: MockLedger, config: ServiceConfig) -> (Arc<MockLedger>, BalanceService<MockLedger>) {
        let ledger = Arc::new(ledger);
        (ledger.clone(), BalanceService::new(ledger, registry(), config).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn merges_native_and_token_balances() {
        let target = addr(0x42);
        let ledger = MockLedger::new(950)
            .with_native_balance(U256::from(1_231_230_982u64))
            .with_logs(vec![
                transfer_log(addr(0xa1), addr(1), target, 900, 10),
                transfer_log(addr(0xa1), target, addr(2), 150, 640),
                transfer_log(addr(0xb2), addr(3), target, 7, 949),
                // beyond the head observed at request time
                transfer_log(addr(0xb2), addr(3), target, 1_000, 951),
            ]);
        let (ledger, service) = service(ledger, config());

        let balances = service
            .get_balances(&CancellationToken::new(), TARGET)
            .await
            .unwrap();

        assert_eq!(balances.get("ETH"), Some(I256::try_from(1_231_230_982u64).unwrap()));
        assert_eq!(balances.get("XES"), Some(I256::try_from(750).unwrap()));
        assert_eq!(balances.get("MKR"), Some(I256::try_from(7).unwrap()));
        assert_eq!(balances.get("BAT"), Some(I256::ZERO));
        assert_eq!(balances.len(), 4);
        assert_eq!(ledger.header_calls(), 1);
    }

    #[tokio::test]
    async fn overdrawn_history_is_reported_negative() {
        let target = addr(0x42);
        let ledger = MockLedger::new(500).with_logs(vec![
            transfer_log(addr(0xa1), addr(1), target, 40, 12),
            transfer_log(addr(0xa1), target, addr(2), 100, 300),
        ]);
        let (_, service) = service(ledger, config());

        let balances = service
            .get_balances(&CancellationToken::new(), TARGET)
            .await
            .unwrap();

        assert_eq!(balances.get("XES"), Some(I256::try_from(-60).unwrap()));
        assert_eq!(balances.negative_symbols(), vec!["XES"]);
    }

    #[test]
    fn native_symbol_shared_with_a_token_is_rejected() {
        let registry: TokenRegistry = [(addr(0xa1), "ETH"), (addr(0xb2), "MKR")].into_iter().collect();

        let result = BalanceService::new(Arc::new(MockLedger::new(10)), registry, config());

        assert!(matches!(result, Err(ScanError::SymbolConflict(symbol)) if symbol == "ETH"));
    }

    #[tokio::test]
    async fn accepts_lowercase_and_checksummed_addresses() {
        let target: Address = "0x84E0b37e8f5B4B86d5d299b0B0e33686405A3919".parse().unwrap();
        let ledger = MockLedger::new(10).with_logs(vec![transfer_log(addr(0xc3), addr(1), target, 3, 5)]);
        let (_, service) = service(ledger, config());

        for input in [
            "0x84E0b37e8f5B4B86d5d299b0B0e33686405A3919",
            "0x84e0b37e8f5b4b86d5d299b0b0e33686405a3919",
        ] {
            let balances = service
                .get_balances(&CancellationToken::new(), input)
                .await
                .unwrap();
            assert_eq!(balances.get("BAT"), Some(I256::try_from(3).unwrap()));
        }
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let (ledger, service) = service(MockLedger::new(10), config());

        for input in ["0x1", "", "not-an-address", "0xZZ0b37e8f5B4B86d5d299b0B0e33686405A3919"] {
            let err = service
                .get_balances(&CancellationToken::new(), input)
                .await
                .unwrap_err();
            assert!(matches!(err, ScanError::InvalidAddress(_)), "{input}: {err}");
        }
        assert_eq!(ledger.header_calls(), 0);
    }

    #[tokio::test]
    async fn chunk_failure_returns_error_only() {
        let (_, service) = service(MockLedger::new(1_000).fail_at(555), config());

        let err = service
            .get_balances(&CancellationToken::new(), TARGET)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::LedgerQuery { range: Some(range), .. } if range.contains(555)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_cancels_and_drains_the_scan() {
        let mut ledger = MockLedger::new(1_000);
        for range in crate::chunker::chunks(0, 1_000, 100).unwrap() {
            ledger = ledger.delay_at(range.start, Duration::from_secs(30));
        }
        let (ledger, service) = service(
            ledger,
            ServiceConfig {
                timeout: Duration::from_millis(100),
                ..config()
            },
        );

        let started = std::time::Instant::now();
        let err = service
            .get_balances(&CancellationToken::new(), TARGET)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ledger.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (_, service) = service(MockLedger::new(1_000), config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service.get_balances(&cancel, TARGET).await.unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));
    }

    #[test]
    fn parse_address_without_prefix() {
        let parsed = parse_address("84e0b37e8f5b4b86d5d299b0b0e33686405a3919").unwrap();
        assert_eq!(
            parsed.to_checksum(None),
            "0x84E0b37e8f5B4B86d5d299b0B0e33686405A3919"
        );
    }
}
