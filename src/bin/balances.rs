use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use token_balance_scanner::cache::{CachedLedgerClient, MemoryLogCache};
use token_balance_scanner::config::Config;
use token_balance_scanner::output::{DEFAULT_DECIMALS, OutputFormat, format_balances};
use token_balance_scanner::rpc::RpcClient;
use token_balance_scanner::service::BalanceService;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "balances")]
#[command(about = "Native and ERC20 token balances of an address at the latest block", long_about = None)]
struct Cli {
    /// Account address, hex encoded
    address: String,

    #[arg(short, long, default_value = "table")]
    format: String,

    /// Decimals used to display whole-unit amounts
    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    decimals: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!(
        "Tracking {} token(s) over {} RPC endpoint(s)",
        config.tokens.len(),
        config.json_rpc_urls.len()
    );

    let client = RpcClient::new(&config.json_rpc_urls, &config)?;
    let client = Arc::new(CachedLedgerClient::new(client, MemoryLogCache::default()));
    let service = BalanceService::new(client, config.tokens.clone(), config.service_config())?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling balance scan");
                token.cancel();
            }
        });
    }

    match service.get_balances(&token, &cli.address).await {
        Ok(balances) => {
            println!(
                "{}",
                format_balances(&cli.address, &balances, cli.decimals, &format)
            );
            Ok(())
        }
        Err(e) => {
            error!("Balance scan failed: {}", e);
            Err(e.into())
        }
    }
}
