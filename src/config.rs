use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result, bail};

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::registry::TokenRegistry;
use crate::scanner::ScanConfig;
use crate::service::ServiceConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub tokens: TokenRegistry,
    pub native_symbol: String,
    pub scan: ScanConfig,
    pub scan_timeout: Duration,
    pub rpc_max_retries: usize,
    pub rpc_request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key-value source, `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let json_rpc_urls: Vec<String> = lookup("JSON_RPC_URLS")
            .or_else(|| lookup("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if json_rpc_urls.is_empty() {
            bail!("JSON_RPC_URLS must contain at least one URL");
        }

        let tokens = parse_tokens(
            &lookup("TOKEN_CONTRACTS").context("TOKEN_CONTRACTS must be set in .env")?,
        )?;

        let native_symbol = lookup("NATIVE_SYMBOL").unwrap_or_else(|| "ETH".to_string());
        if tokens.symbols().any(|symbol| symbol == native_symbol) {
            bail!("NATIVE_SYMBOL {native_symbol} is also used by a token contract");
        }

        let chunk_size = parse_or(&lookup, "SCAN_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            bail!("SCAN_CHUNK_SIZE must be greater than zero");
        }
        let workers = parse_or(&lookup, "SCAN_WORKERS", ScanConfig::default().workers)?;
        if workers == 0 {
            bail!("SCAN_WORKERS must be greater than zero");
        }
        let default_delay = ScanConfig::default().request_delay.as_millis() as u64;
        let request_delay = parse_or(&lookup, "SCAN_REQUEST_DELAY_MS", default_delay)?;

        Ok(Config {
            json_rpc_urls,
            tokens,
            native_symbol,
            scan: ScanConfig {
                chunk_size,
                workers,
                request_delay: Duration::from_millis(request_delay),
            },
            scan_timeout: Duration::from_secs(parse_or(&lookup, "SCAN_TIMEOUT_SECS", 600)?),
            rpc_max_retries: parse_or(&lookup, "RPC_MAX_RETRIES", 3)?,
            rpc_request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RPC_REQUEST_TIMEOUT_SECS",
                120,
            )?),
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            native_symbol: self.native_symbol.clone(),
            timeout: self.scan_timeout,
            scan: self.scan.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Config {
            json_rpc_urls: vec!["http://localhost:8545".to_string()],
            tokens: TokenRegistry::new(),
            native_symbol: "ETH".to_string(),
            scan: ScanConfig::default(),
            scan_timeout: Duration::from_secs(600),
            rpc_max_retries: 0,
            rpc_request_timeout: Duration::from_secs(5),
        }
    }
}

/// Parses `SYMBOL=0xADDRESS` pairs separated by commas.
fn parse_tokens(raw: &str) -> Result<TokenRegistry> {
    let mut registry = TokenRegistry::new();
    let mut symbols = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (symbol, address) = entry
            .split_once('=')
            .with_context(|| format!("Invalid token entry {entry:?}, expected SYMBOL=0xADDRESS"))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            bail!("Missing symbol in token entry {entry:?}");
        }

        let address = Address::from_str(address.trim())
            .with_context(|| format!("Invalid contract address for {symbol}"))?;

        if !symbols.insert(symbol.to_string()) {
            bail!("Token symbol {symbol} configured twice");
        }
        if registry.insert(address, symbol).is_some() {
            bail!("Contract {} configured twice", address.to_checksum(None));
        }
    }

    if registry.is_empty() {
        bail!("TOKEN_CONTRACTS must list at least one token");
    }
    Ok(registry)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value {value:?}")),
        None => Ok(default),
    }
}
