pub mod accumulator;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod output;
pub mod registry;
pub mod rpc;
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use accumulator::{BalanceAccumulator, BalanceMap};
pub use error::{ScanError, ScanResult};
pub use ledger::LedgerClient;
pub use registry::TokenRegistry;
pub use scanner::{ScanConfig, ScanCoordinator};
pub use service::{BalanceService, ServiceConfig};
