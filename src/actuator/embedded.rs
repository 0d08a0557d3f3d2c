//! In-process ledger client: submits operations against an
//! [`AssetHtlcLedger`] owned by this process, signing as the coordinator
//! account.

use std::sync::{Arc, Mutex};

use crate::{
    ledger::{escrow::Escrow, events::RawLedgerLog, AssetHtlcLedger},
    utill::now_secs,
};

use super::{LedgerClient, LedgerOp, SubmitError};

/// Resource units charged for an escrow open.
const UNITS_OPEN: u64 = 90_000;
/// Resource units charged for a claim (escrow clear + transfer).
const UNITS_CLAIM: u64 = 120_000;
/// Resource units charged for a refund.
const UNITS_REFUND: u64 = 60_000;

/// Ledger client running against an in-process ledger instance.
#[derive(Clone)]
pub struct EmbeddedLedger {
    ledger: Arc<Mutex<AssetHtlcLedger>>,
    /// Account the coordinator signs ledger operations with.
    account: String,
}

impl EmbeddedLedger {
    /// Wraps a shared ledger, signing as `account`.
    pub fn new(ledger: Arc<Mutex<AssetHtlcLedger>>, account: &str) -> Self {
        Self {
            ledger,
            account: account.to_string(),
        }
    }
}

impl LedgerClient for EmbeddedLedger {
    fn estimate_units(&self, op: &LedgerOp) -> Result<u64, String> {
        Ok(match op {
            LedgerOp::OpenEscrow { .. } => UNITS_OPEN,
            LedgerOp::Claim { .. } => UNITS_CLAIM,
            LedgerOp::Refund { .. } => UNITS_REFUND,
        })
    }

    fn submit(&self, op: &LedgerOp, max_units: u64) -> Result<Vec<RawLedgerLog>, SubmitError> {
        let estimate = self.estimate_units(op).unwrap_or(0);
        if max_units < estimate {
            return Err(SubmitError::Transport(format!(
                "resource limit {max_units} below required {estimate}"
            )));
        }
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| SubmitError::Transport("ledger mutex poisoned".to_string()))?;
        let now = now_secs();
        let logs = match op {
            LedgerOp::OpenEscrow {
                token_id,
                seller,
                buyer,
                hash,
                expiry,
                price_sats,
            } => {
                // The coordinator submits on the seller's behalf; the
                // embedded ledger authorizes by the sale's recorded seller.
                let caller = if seller.is_empty() {
                    self.account.as_str()
                } else {
                    seller.as_str()
                };
                ledger.sale_open(caller, *token_id, buyer, *hash, *expiry, *price_sats, now)
            }
            LedgerOp::Claim { token_id, preimage } => {
                let buyer = ledger
                    .get_escrow(*token_id)
                    .map(|escrow| escrow.buyer.clone());
                match buyer {
                    Some(buyer) => ledger.claim(&buyer, *token_id, *preimage, now),
                    None => ledger.claim(&self.account, *token_id, *preimage, now),
                }
            }
            LedgerOp::Refund { token_id } => {
                let seller = ledger
                    .get_escrow(*token_id)
                    .map(|escrow| escrow.seller.clone());
                match seller {
                    Some(seller) => ledger.refund(&seller, *token_id, now),
                    None => ledger.refund(&self.account, *token_id, now),
                }
            }
        };
        logs.map_err(SubmitError::Rejected)
    }

    fn is_in_escrow(&self, token_id: u64) -> Result<bool, String> {
        let ledger = self.ledger.lock().map_err(|e| e.to_string())?;
        Ok(ledger.is_in_escrow(token_id))
    }

    fn get_escrow(&self, token_id: u64) -> Result<Option<Escrow>, String> {
        let ledger = self.ledger.lock().map_err(|e| e.to_string())?;
        Ok(ledger.get_escrow(token_id).cloned())
    }

    fn get_owner(&self, token_id: u64) -> Result<Option<String>, String> {
        let ledger = self.ledger.lock().map_err(|e| e.to_string())?;
        Ok(ledger.owner_of(token_id).ok().map(|s| s.to_string()))
    }
}
