//! TCP admin RPC server for the coordinator.

use std::{
    io::ErrorKind,
    net::{TcpListener, TcpStream},
    time::Duration,
};

use crate::{
    coordinator::{error::CoordinatorError, CoordinatorHandle},
    utill::{recv_message, send_message},
};

use super::messages::{RpcMsgReq, RpcMsgResp};

fn handle_request(
    handle: &CoordinatorHandle,
    socket: &mut TcpStream,
) -> Result<(), CoordinatorError> {
    let rpc_request: RpcMsgReq = recv_message(socket)?;
    log::info!("RPC request received: {rpc_request:?}");

    let resp = match rpc_request {
        RpcMsgReq::Ping => RpcMsgResp::Pong,
        RpcMsgReq::RegisterSwap(request) => match handle.register_swap(request) {
            Ok(payload) => RpcMsgResp::RegisterResp(Box::new(payload)),
            Err(e) => RpcMsgResp::Error(e.to_string()),
        },
        RpcMsgReq::GetSwap { hash } => match handle.get_swap(&hash) {
            Ok(swap) => RpcMsgResp::SwapResp(swap.map(Box::new)),
            Err(e) => RpcMsgResp::Error(e.to_string()),
        },
        RpcMsgReq::ListSwaps => match handle.list_swaps() {
            Ok(swaps) => RpcMsgResp::ListResp(swaps),
            Err(e) => RpcMsgResp::Error(e.to_string()),
        },
        RpcMsgReq::ForceClaim { token_id, preimage } => {
            match handle.force_claim(token_id, preimage) {
                Ok(()) => RpcMsgResp::Dispatched,
                Err(e) => RpcMsgResp::Error(e.to_string()),
            }
        }
        RpcMsgReq::ForceRefund { token_id } => match handle.force_refund(token_id) {
            Ok(()) => RpcMsgResp::Dispatched,
            Err(e) => RpcMsgResp::Error(e.to_string()),
        },
        RpcMsgReq::Stats => match handle.stats() {
            Ok(stats) => RpcMsgResp::StatsResp(stats),
            Err(e) => RpcMsgResp::Error(e.to_string()),
        },
        RpcMsgReq::Shutdown => {
            handle.shutdown();
            RpcMsgResp::ShutdownResp
        }
    };

    send_message(socket, &resp)?;
    Ok(())
}

/// Runs the admin RPC listener until shutdown is requested.
///
/// The listener is non-blocking so the shutdown flag is observed within a
/// polling tick even when no client ever connects.
pub fn run_rpc_server(handle: &CoordinatorHandle, port: u16) -> Result<(), CoordinatorError> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    listener.set_nonblocking(true)?;
    log::info!("Admin RPC listening on 127.0.0.1:{port}");

    while !handle.is_shutdown() {
        match listener.accept() {
            Ok((mut socket, addr)) => {
                log::debug!("RPC connection from {addr}");
                socket.set_read_timeout(Some(Duration::from_secs(20)))?;
                socket.set_nonblocking(false)?;
                if let Err(e) = handle_request(handle, &mut socket) {
                    log::error!("Error processing RPC request: {e}");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(e) => {
                log::error!("RPC accept failed: {e}");
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }
    log::info!("Admin RPC listener stopped");
    Ok(())
}
