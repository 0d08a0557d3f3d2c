use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use clap::Parser;

use assetswap::{
    actuator::embedded::EmbeddedLedger,
    chain::api_backend::BitcoinApi,
    coordinator::{config::CoordinatorConfig, rpc::server::run_rpc_server, Coordinator},
    ledger::AssetHtlcLedger,
    utill::{get_coordinator_dir, setup_logger},
};

/// Assetswap Coordinator Server
///
/// Watches a Bitcoin chain API for HTLC funding payments, drives the asset
/// ledger to lock, settle or refund token escrows under the same hash
/// commitment, and enforces atomicity with asymmetric timelocks.
///
/// The daemon is operated with the swap-cli app for swap registration,
/// inspection and forced settlement.
///
/// This is early beta, and there are known and unknown bugs. Please report
/// issues in the project issue board.
#[derive(Parser, Debug)]
#[clap(version = option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
author = option_env!("CARGO_PKG_AUTHORS").unwrap_or(""))]
struct Cli {
    /// Optional data directory. Default value: "~/.assetswap/coordinator"
    #[clap(long, short = 'd')]
    data_directory: Option<PathBuf>,
    /// Bitcoin REST API base URL (Esplora-style).
    #[clap(name = "API_URL", long, short = 'r')]
    pub rpc: Option<String>,
    /// Chain notifier WebSocket URL. Empty disables the push channel.
    #[clap(name = "WS_URL", long, short = 'w')]
    pub ws: Option<String>,
    /// Confirmations required before the asset escrow opens.
    #[clap(long, short = 'c')]
    pub confirmations: Option<u64>,
    /// Admin RPC port.
    #[clap(long, short = 'p')]
    pub rpc_port: Option<u16>,
}

fn main() -> ExitCode {
    setup_logger(log::LevelFilter::Info);
    let args = Cli::parse();

    let data_dir = args.data_directory.unwrap_or_else(get_coordinator_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        log::error!("Cannot create data directory {:?}: {}", data_dir, e);
        return ExitCode::FAILURE;
    }

    // Load static settings from config file (auto-creates defaults if
    // missing), then apply CLI overrides.
    let config_path = data_dir.join("config.toml");
    let mut config = match CoordinatorConfig::new(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = args.rpc {
        config.btc_api_url = url;
    }
    if let Some(url) = args.ws {
        config.btc_ws_url = url;
    }
    if let Some(confirmations) = args.confirmations {
        config.min_confirmations = confirmations;
    }
    if let Some(port) = args.rpc_port {
        config.rpc_port = port;
    }

    // The embedded ledger serves development and testing; a production
    // deployment points asset_rpc_url at a real ledger node.
    if config.asset_rpc_url != "embedded" {
        log::error!(
            "Remote asset ledger ({}) is not wired up yet; set asset_rpc_url = embedded",
            config.asset_rpc_url
        );
        return ExitCode::FAILURE;
    }
    let ledger = Arc::new(Mutex::new(AssetHtlcLedger::new()));
    let client = Arc::new(EmbeddedLedger::new(ledger, &config.coordinator_account));
    let source = Box::new(BitcoinApi::new(&config.btc_api_url));

    let rpc_port = config.rpc_port;
    let (handle, join) = match Coordinator::start(config, &data_dir, client, source) {
        Ok(started) => started,
        Err(e) => {
            log::error!("Coordinator failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run_rpc_server(&handle, rpc_port) {
        log::error!("Admin RPC server failed: {e}");
        handle.shutdown();
        let _ = join.join();
        return ExitCode::FAILURE;
    }

    if join.join().is_err() {
        log::error!("Coordinator thread panicked");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
