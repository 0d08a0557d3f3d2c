//! Coordinator configuration. Controlling chain endpoints, confirmation
//! policy, timeout buffers and retry behavior.

use std::{io, io::Write, path::Path};

use crate::{
    protocol::timelock::DEFAULT_BUFFER_HOURS,
    utill::{parse_field, parse_toml},
};

/// Coordinator configuration with chain endpoints and swap policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Base URL of the Esplora-style Bitcoin REST API.
    pub btc_api_url: String,
    /// WebSocket notifier endpoint; empty disables the push channel.
    pub btc_ws_url: String,
    /// Asset ledger RPC endpoint; `embedded` runs the in-process ledger.
    pub asset_rpc_url: String,
    /// Asset HTLC contract address on the asset ledger.
    pub asset_contract_address: String,
    /// Account the coordinator signs asset-ledger submissions with.
    pub coordinator_account: String,
    /// Confirmations required before the asset escrow opens.
    pub min_confirmations: u64,
    /// Safety buffer Δ between the asset and BTC timelocks, in hours.
    pub timeout_buffer_hours: u64,
    /// Coordinator head-start before the buyer-visible deadline, in seconds.
    /// Deliberately independent of `timeout_buffer_hours`.
    pub head_start_secs: u64,
    /// Chain poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Ledger submission attempts before a failure is surfaced.
    pub max_retries: u32,
    /// Automatically claim the asset once the secret is observed.
    pub auto_claim: bool,
    /// Resource-unit ceiling used when estimation fails.
    pub unit_ceiling: u64,
    /// Admin RPC listen port.
    pub rpc_port: u16,
    /// BTC network tag for handoff payloads (`testnet` or `mainnet`).
    pub network_btc: String,
    /// Asset ledger network tag for handoff payloads.
    pub network_asset: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            btc_api_url: "https://blockstream.info/testnet/api".to_string(),
            btc_ws_url: String::new(),
            asset_rpc_url: "embedded".to_string(),
            asset_contract_address: "asset-htlc".to_string(),
            coordinator_account: "coordinator".to_string(),
            min_confirmations: 1,
            timeout_buffer_hours: DEFAULT_BUFFER_HOURS,
            head_start_secs: 7200,
            poll_interval_ms: 30_000,
            max_retries: 5,
            auto_claim: true,
            unit_ceiling: 500_000,
            rpc_port: 6103,
            network_btc: "testnet".to_string(),
            network_asset: "assetnet-local".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Constructs a [CoordinatorConfig] from a specified config file, or
    /// creates a default config at that path and loads it.
    pub fn new(config_path: &Path) -> io::Result<Self> {
        let default_config = Self::default();

        if !config_path.exists() || std::fs::metadata(config_path)?.len() == 0 {
            log::warn!(
                "Coordinator config file not found, creating default config file at path: {}",
                config_path.display()
            );
            default_config.write_to_file(config_path)?;
        }

        let config_map = parse_toml(config_path)?;
        log::info!(
            "Successfully loaded config file from : {}",
            config_path.display()
        );

        Ok(CoordinatorConfig {
            btc_api_url: parse_field(
                config_map.get("btc_api_url"),
                default_config.btc_api_url,
            ),
            btc_ws_url: parse_field(config_map.get("btc_ws_url"), default_config.btc_ws_url),
            asset_rpc_url: parse_field(
                config_map.get("asset_rpc_url"),
                default_config.asset_rpc_url,
            ),
            asset_contract_address: parse_field(
                config_map.get("asset_contract_address"),
                default_config.asset_contract_address,
            ),
            coordinator_account: parse_field(
                config_map.get("coordinator_account"),
                default_config.coordinator_account,
            ),
            min_confirmations: parse_field(
                config_map.get("min_confirmations"),
                default_config.min_confirmations,
            ),
            timeout_buffer_hours: parse_field(
                config_map.get("timeout_buffer_hours"),
                default_config.timeout_buffer_hours,
            ),
            head_start_secs: parse_field(
                config_map.get("head_start_secs"),
                default_config.head_start_secs,
            ),
            poll_interval_ms: parse_field(
                config_map.get("poll_interval_ms"),
                default_config.poll_interval_ms,
            ),
            max_retries: parse_field(config_map.get("max_retries"), default_config.max_retries),
            auto_claim: parse_field(config_map.get("auto_claim"), default_config.auto_claim),
            unit_ceiling: parse_field(
                config_map.get("unit_ceiling"),
                default_config.unit_ceiling,
            ),
            rpc_port: parse_field(config_map.get("rpc_port"), default_config.rpc_port),
            network_btc: parse_field(config_map.get("network_btc"), default_config.network_btc),
            network_asset: parse_field(
                config_map.get("network_asset"),
                default_config.network_asset,
            ),
        })
    }

    /// Manually serialize the config into a TOML string and write it out.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let toml_data = format!(
            "btc_api_url = {}
btc_ws_url = {}
asset_rpc_url = {}
asset_contract_address = {}
coordinator_account = {}
min_confirmations = {}
timeout_buffer_hours = {}
head_start_secs = {}
poll_interval_ms = {}
max_retries = {}
auto_claim = {}
unit_ceiling = {}
rpc_port = {}
network_btc = {}
network_asset = {}",
            self.btc_api_url,
            self.btc_ws_url,
            self.asset_rpc_url,
            self.asset_contract_address,
            self.coordinator_account,
            self.min_confirmations,
            self.timeout_buffer_hours,
            self.head_start_secs,
            self.poll_interval_ms,
            self.max_retries,
            self.auto_claim,
            self.unit_ceiling,
            self.rpc_port,
            self.network_btc,
            self.network_asset,
        );
        std::fs::create_dir_all(path.parent().expect("Path should NOT be root!"))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_data.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
