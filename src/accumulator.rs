use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::{Address, I256, U256};
use tracing::{debug, warn};

use crate::error::{ScanError, ScanResult};
use crate::events::TransferEvent;

/// Final per-symbol balances of one address. Absent symbols are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceMap {
    balances: BTreeMap<String, I256>,
}

impl BalanceMap {
    pub fn get(&self, symbol: &str) -> Option<I256> {
        self.balances.get(symbol).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &I256)> {
        self.balances.iter().map(|(symbol, balance)| (symbol.as_str(), balance))
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// A complete history never nets below zero; a negative entry points at missing blocks.
    pub fn negative_symbols(&self) -> Vec<&str> {
        self.balances
            .iter()
            .filter(|(_, balance)| balance.is_negative())
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }

    /// Logs one warning per negative entry of `address` at `block`.
    pub fn warn_negative(&self, address: Address, block: u64) {
        for symbol in self.negative_symbols() {
            warn!(
                "Negative {} balance for {} at block {}: {:?}, the scanned history is incomplete",
                symbol,
                address,
                block,
                self.get(symbol)
            );
        }
    }
}

/// Running balances shared by all scan workers. Every read-modify-write happens under one lock.
#[derive(Debug, Default)]
pub struct BalanceAccumulator {
    balances: Mutex<BTreeMap<String, I256>>,
}

impl BalanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts every symbol at zero so it shows up in the snapshot even without transfers.
    pub fn with_symbols<'a>(symbols: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            balances: Mutex::new(
                symbols
                    .into_iter()
                    .map(|symbol| (symbol.to_owned(), I256::ZERO))
                    .collect(),
            ),
        }
    }

    /// Nets `event` against `address`. A self-transfer applies both steps.
    pub fn apply_transfer(
        &self,
        symbol: &str,
        event: &TransferEvent,
        address: Address,
    ) -> ScanResult<()> {
        let receiving = event.is_receiver(address);
        let sending = event.is_sender(address);
        if !receiving && !sending {
            return Ok(());
        }

        let amount = I256::try_from(event.amount).map_err(|_| {
            ScanError::malformed(event.tx_hash, format!("amount {} out of range", event.amount))
        })?;

        let mut balances = self.lock();
        let balance = balances.entry(symbol.to_owned()).or_insert(I256::ZERO);

        if receiving {
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| ScanError::malformed(event.tx_hash, "balance overflow"))?;
            debug!(
                "Incoming transfer of {} {} (tx {:?}). New balance: {}",
                event.amount, symbol, event.tx_hash, balance
            );
        }

        if sending {
            *balance = balance
                .checked_sub(amount)
                .ok_or_else(|| ScanError::malformed(event.tx_hash, "balance underflow"))?;
            debug!(
                "Outgoing transfer of {} {} (tx {:?}). New balance: {}",
                event.amount, symbol, event.tx_hash, balance
            );
        }

        Ok(())
    }

    /// Stores the natively queried balance under its reserved symbol, replacing any value.
    pub fn apply_native_balance(&self, symbol: &str, amount: U256) -> ScanResult<()> {
        let amount = I256::try_from(amount).map_err(|_| {
            ScanError::malformed(None, format!("native balance {amount} out of range"))
        })?;
        self.lock().insert(symbol.to_owned(), amount);
        Ok(())
    }

    pub fn snapshot(&self) -> BalanceMap {
        BalanceMap {
            balances: self.lock().clone(),
        }
    }

    // every update is a single store, so a poisoned map is still consistent
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, I256>> {
        self.balances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
