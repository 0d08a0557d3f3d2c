//! Admin RPC messages exchanged between `swap-cli` and the coordinator.

use serde::{Deserialize, Serialize};

use crate::{
    coordinator::{
        swap::{PendingSwap, SwapRequest},
        SwapStats,
    },
    protocol::{handoff::HandoffPayload, hashlock::HashLock, hashlock::Preimage},
};

/// RPC request messages supported by the coordinator.
#[derive(Serialize, Deserialize, Debug)]
pub enum RpcMsgReq {
    /// Check if the coordinator is responding.
    Ping,
    /// Register a new swap.
    RegisterSwap(SwapRequest),
    /// Get one swap by its hash commitment.
    GetSwap {
        /// Hash identifying the swap.
        hash: HashLock,
    },
    /// List all swaps, active and recently terminal.
    ListSwaps,
    /// Operator-forced claim for a stuck swap.
    ForceClaim {
        /// Token under escrow.
        token_id: u64,
        /// The secret to claim with.
        preimage: Preimage,
    },
    /// Operator-forced refund for a stuck swap.
    ForceRefund {
        /// Token under escrow.
        token_id: u64,
    },
    /// Aggregate counters.
    Stats,
    /// Stop the coordinator.
    Shutdown,
}

/// RPC response messages returned by the coordinator.
#[derive(Serialize, Deserialize, Debug)]
pub enum RpcMsgResp {
    /// Coordinator is alive.
    Pong,
    /// Swap registered; carries the buyer handoff payload.
    RegisterResp(Box<HandoffPayload>),
    /// The requested swap, if present.
    SwapResp(Option<Box<PendingSwap>>),
    /// All swaps in the book.
    ListResp(Vec<PendingSwap>),
    /// The force operation was dispatched; outcome visible via `GetSwap`.
    Dispatched,
    /// Aggregate counters.
    StatsResp(SwapStats),
    /// Shutdown acknowledged.
    ShutdownResp,
    /// The request failed.
    Error(String),
}
