use std::{net::TcpStream, str::FromStr, time::Duration};

use clap::Parser;

use assetswap::{
    coordinator::{
        error::CoordinatorError,
        rpc::messages::{RpcMsgReq, RpcMsgResp},
        swap::SwapRequest,
    },
    error::AppError,
    protocol::hashlock::{HashLock, Preimage},
    utill::{recv_message, send_message, setup_logger},
};

/// swap-cli is a command line app to send RPC messages to the coordinator.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct App {
    /// Coordinator admin RPC port.
    #[clap(long, short = 'p', default_value = "6103")]
    port: u16,
    /// The command to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Sends a Ping
    Ping,
    /// Registers a new swap and prints the buyer handoff payload
    RegisterSwap {
        /// Hash commitment, 64 hex digits
        hash: String,
        /// Token being sold
        token_id: u64,
        /// Price in satoshis
        price_sats: u64,
        /// Seller's BTC receiving address
        seller_btc_addr: String,
        /// Seller's asset-ledger account
        seller_asset_addr: String,
        /// Buyer's asset-ledger account
        buyer_asset_addr: String,
        /// Asset-leg deadline, unix seconds
        deadline: u64,
        /// Token title for the handoff payload
        #[clap(default_value = "")]
        asset_title: String,
    },
    /// Returns one swap by hash
    GetSwap {
        /// Hash commitment, 64 hex digits
        hash: String,
    },
    /// Returns all swaps
    ListSwaps,
    /// Forces a claim on a stuck swap
    ForceClaim {
        /// Token under escrow
        token_id: u64,
        /// The secret, 64 hex digits
        secret: String,
    },
    /// Forces a refund on a stuck swap
    ForceRefund {
        /// Token under escrow
        token_id: u64,
    },
    /// Returns aggregate coordinator counters
    Stats,
    /// Stops the coordinator
    Stop,
}

fn main() -> Result<(), AppError> {
    setup_logger(log::LevelFilter::Warn);
    let cli = App::parse();

    let request = match cli.command {
        Commands::Ping => RpcMsgReq::Ping,
        Commands::RegisterSwap {
            hash,
            token_id,
            price_sats,
            seller_btc_addr,
            seller_asset_addr,
            buyer_asset_addr,
            deadline,
            asset_title,
        } => RpcMsgReq::RegisterSwap(SwapRequest {
            hash: parse_hash(&hash)?,
            token_id,
            price_sats,
            seller_btc_addr,
            seller_asset_addr,
            buyer_asset_addr,
            deadline,
            asset_title,
        }),
        Commands::GetSwap { hash } => RpcMsgReq::GetSwap {
            hash: parse_hash(&hash)?,
        },
        Commands::ListSwaps => RpcMsgReq::ListSwaps,
        Commands::ForceClaim { token_id, secret } => RpcMsgReq::ForceClaim {
            token_id,
            preimage: Preimage::from_str(&secret).map_err(AppError::Protocol)?,
        },
        Commands::ForceRefund { token_id } => RpcMsgReq::ForceRefund { token_id },
        Commands::Stats => RpcMsgReq::Stats,
        Commands::Stop => RpcMsgReq::Shutdown,
    };

    send_rpc_req(&request, cli.port)
}

fn parse_hash(s: &str) -> Result<HashLock, AppError> {
    HashLock::from_str(s).map_err(AppError::Protocol)
}

fn send_rpc_req(req: &RpcMsgReq, port: u16) -> Result<(), AppError> {
    let mut stream =
        TcpStream::connect(("127.0.0.1", port)).map_err(CoordinatorError::IO)?;
    stream
        .set_read_timeout(Some(Duration::from_secs(20)))
        .map_err(CoordinatorError::IO)?;
    stream
        .set_write_timeout(Some(Duration::from_secs(20)))
        .map_err(CoordinatorError::IO)?;

    send_message(&mut stream, &req).map_err(CoordinatorError::Net)?;
    let response: RpcMsgResp = recv_message(&stream).map_err(CoordinatorError::Net)?;

    match response {
        RpcMsgResp::RegisterResp(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
            println!("{}", payload.bip21_uri());
        }
        other => println!("{other:?}"),
    }

    Ok(())
}
