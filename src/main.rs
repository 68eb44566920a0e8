use std::{sync::Arc, time::Duration};

use ethers::providers::{Http, Provider};
use stakedesk::{
    config::AppConfig,
    error::{AppError, AppResult},
    implementations::classifier::ErrorClassifier,
    layers::{
        rpc::RpcServer,
        session::{SessionController, SessionSettings},
    },
    wallet::WalletManager,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("fatal error: {err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    init_tracing();

    info!("loading configuration");
    let config = AppConfig::load()?;

    let wallet = if config.eth_rpc_url.trim().is_empty() {
        warn!("no RPC endpoint configured; running without a wallet");
        None
    } else {
        info!("connecting to provider");
        let provider = Arc::new(build_provider(&config.eth_rpc_url)?);

        info!("initialising wallet manager");
        let wallet = Arc::new(WalletManager::from_config(&config, provider)?);
        wallet.spawn_chain_watcher(Duration::from_millis(config.chain_poll_interval_ms));
        Some(wallet)
    };

    let settings = SessionSettings::from_config(&config)?;
    let classifier = config
        .error_markers
        .clone()
        .map(ErrorClassifier::new)
        .unwrap_or_default();
    let controller = SessionController::new(wallet.clone(), settings, classifier);

    info!("starting JSON-RPC stdio server");
    let server = RpcServer::new(wallet, controller);
    tokio::select! {
        result = server.run_stdio() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .init();
}

fn build_provider(url: &str) -> AppResult<Provider<Http>> {
    Provider::<Http>::try_from(url)
        .map_err(|err| AppError::Config(format!("failed to create provider: {err}")))
}
