//! Persistent swap book for crash-resilient coordination.
//!
//! Stores pending-swap state to `{data_dir}/swap_book.cbor` using atomic
//! writes (write-to-tmp then rename) so the coordinator can resume watching
//! and timing swaps after a restart.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    protocol::hashlock::{HashLock, Preimage},
    utill::{now_secs, RETIREMENT_SECS},
};

use super::error::CoordinatorError;

/// Lifecycle states of a pending swap.
///
/// `waiting_btc → btc_locked → asset_locked → claimed` is the happy path and
/// strictly forward; `Claimed`, `Refunded` and `Expired` are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Hash)]
pub enum SwapStatus {
    /// Registered, no qualifying BTC funding seen yet.
    #[default]
    WaitingBtc,
    /// Funding seen, waiting for confirmations / asset escrow open.
    BtcLocked,
    /// Asset escrow is open; the buyer can claim with the secret.
    AssetLocked,
    /// Sale settled to the buyer.
    Claimed,
    /// Asset escrow refunded to the seller.
    Refunded,
    /// Swap ended without an asset-side settlement.
    Expired,
}

impl SwapStatus {
    /// Terminal states retire after 24 h and never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Claimed | SwapStatus::Refunded | SwapStatus::Expired
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatus::WaitingBtc => "waiting_btc",
            SwapStatus::BtcLocked => "btc_locked",
            SwapStatus::AssetLocked => "asset_locked",
            SwapStatus::Claimed => "claimed",
            SwapStatus::Refunded => "refunded",
            SwapStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Registration input for a new swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Hash commitment identifying the swap.
    pub hash: HashLock,
    /// Token being sold.
    pub token_id: u64,
    /// Price of the BTC leg, in satoshis.
    pub price_sats: u64,
    /// Seller's BTC receiving address.
    pub seller_btc_addr: String,
    /// Seller's account on the asset ledger.
    pub seller_asset_addr: String,
    /// Buyer's account on the asset ledger.
    pub buyer_asset_addr: String,
    /// Buyer-visible asset-leg deadline, unix seconds.
    pub deadline: u64,
    /// Token title, echoed into the handoff payload.
    pub asset_title: String,
}

/// A persistent record of one swap's state and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSwap {
    /// Hash commitment identifying the swap.
    pub hash: HashLock,
    /// Token being sold.
    pub token_id: u64,
    /// Price of the BTC leg, in satoshis.
    pub price_sats: u64,
    /// Seller's BTC receiving address (watched for funding).
    pub seller_btc_addr: String,
    /// Seller's account on the asset ledger.
    pub seller_asset_addr: String,
    /// Buyer's account on the asset ledger.
    pub buyer_asset_addr: String,
    /// Buyer-visible asset-leg deadline, unix seconds.
    pub deadline: u64,
    /// Current lifecycle state.
    pub status: SwapStatus,
    /// BTC funding transaction, once seen.
    pub btc_txid: Option<String>,
    /// Satoshis actually paid (may exceed the price).
    pub funded_sats: Option<u64>,
    /// BTC transaction that revealed the secret.
    pub reveal_txid: Option<String>,
    /// The revealed secret, once observed.
    pub secret: Option<Preimage>,
    /// Asset-ledger transaction that opened the escrow.
    pub asset_open_txid: Option<String>,
    /// Asset-ledger transaction that settled or refunded the escrow.
    pub asset_close_txid: Option<String>,
    /// Last surfaced failure, awaiting retry or operator action.
    pub last_error: Option<String>,
    /// Attempt counter for the currently retried operation.
    pub retry_attempt: u32,
    /// Registration time.
    pub created_at: u64,
    /// Last state change.
    pub updated_at: u64,
}

impl PendingSwap {
    /// Creates a fresh record in `waiting_btc`.
    pub fn from_request(req: &SwapRequest) -> Self {
        let now = now_secs();
        PendingSwap {
            hash: req.hash,
            token_id: req.token_id,
            price_sats: req.price_sats,
            seller_btc_addr: req.seller_btc_addr.clone(),
            seller_asset_addr: req.seller_asset_addr.clone(),
            buyer_asset_addr: req.buyer_asset_addr.clone(),
            deadline: req.deadline,
            status: SwapStatus::WaitingBtc,
            btc_txid: None,
            funded_sats: None,
            reveal_txid: None,
            secret: None,
            asset_open_txid: None,
            asset_close_txid: None,
            last_error: None,
            retry_attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

fn short_txid(txid: &str) -> &str {
    &txid[..8.min(txid.len())]
}

impl fmt::Display for PendingSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] token={} status={} price={}sat deadline={}",
            self.hash.short(),
            self.token_id,
            self.status,
            self.price_sats,
            self.deadline,
        )?;
        if let Some(txid) = &self.btc_txid {
            write!(f, " btc_tx={}", short_txid(txid))?;
        }
        if let Some(txid) = &self.reveal_txid {
            write!(f, " reveal_tx={}", short_txid(txid))?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " error={err}")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct SwapBookData {
    swaps: HashMap<HashLock, PendingSwap>,
}

/// Persistent swap book backed by a CBOR file with atomic writes.
pub struct SwapBook {
    path: PathBuf,
    data: SwapBookData,
}

impl SwapBook {
    /// Load the book from disk or create a new empty one.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, CoordinatorError> {
        let path = data_dir.join("swap_book.cbor");
        let data = if path.exists() {
            match std::fs::read(&path) {
                Ok(bytes) => serde_cbor::from_slice(&bytes).unwrap_or_default(),
                Err(e) => {
                    log::warn!("Failed to read swap book at {:?}: {}", path, e);
                    SwapBookData::default()
                }
            }
        } else {
            SwapBookData::default()
        };
        Ok(Self { path, data })
    }

    /// Atomic flush: write to tmp file, then rename over original.
    fn flush(&self) -> Result<(), CoordinatorError> {
        let tmp_path = self.path.with_extension("cbor.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_cbor::to_vec(&self.data)?;
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Upsert a swap record and flush to disk.
    pub fn save(&mut self, swap: &PendingSwap) -> Result<(), CoordinatorError> {
        self.data.swaps.insert(swap.hash, swap.clone());
        self.flush()
    }

    /// Get a swap by hash.
    pub fn get(&self, hash: &HashLock) -> Option<&PendingSwap> {
        self.data.swaps.get(hash)
    }

    /// Finds the non-terminal swap for a token, used by force operations.
    pub fn find_by_token(&self, token_id: u64) -> Option<&PendingSwap> {
        self.data
            .swaps
            .values()
            .find(|s| s.token_id == token_id && !s.status.is_terminal())
    }

    /// All swaps, active and recently terminal.
    pub fn all(&self) -> Vec<PendingSwap> {
        self.data.swaps.values().cloned().collect()
    }

    /// Non-terminal swaps, for startup recovery.
    pub fn active(&self) -> Vec<PendingSwap> {
        self.data
            .swaps
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Evicts terminal swaps that have been sitting longer than the
    /// retirement window. Returns the evicted hashes.
    pub fn retire_old(&mut self, now: u64) -> Result<Vec<HashLock>, CoordinatorError> {
        let retired: Vec<HashLock> = self
            .data
            .swaps
            .values()
            .filter(|s| {
                s.status.is_terminal() && now.saturating_sub(s.updated_at) >= RETIREMENT_SECS
            })
            .map(|s| s.hash)
            .collect();
        if !retired.is_empty() {
            for hash in &retired {
                self.data.swaps.remove(hash);
            }
            self.flush()?;
        }
        Ok(retired)
    }

    /// Count of swaps per status.
    pub fn count_by_status(&self) -> HashMap<SwapStatus, usize> {
        let mut counts = HashMap::new();
        for swap in self.data.swaps.values() {
            *counts.entry(swap.status).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of records (including recently terminal).
    pub fn len(&self) -> usize {
        self.data.swaps.len()
    }

    /// True when the book holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.swaps.is_empty()
    }

    /// Log all swap records at INFO level.
    pub fn log_state(&self) {
        if self.data.swaps.is_empty() {
            log::info!("[SwapBook] (empty — no records)");
            return;
        }
        for swap in self.data.swaps.values() {
            log::info!("[SwapBook] {}", swap);
        }
    }
}
