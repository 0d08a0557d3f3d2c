//! Escrow subsystem capability: at most one active escrow per token.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::hashlock::{HashLock, Preimage};

use super::error::LedgerError;

/// Escrow expiry must be strictly more than this far in the future at open.
#[cfg(feature = "integration-test")]
pub const MIN_EXPIRY_LEAD_SECS: u64 = 5;
/// Escrow expiry must be strictly more than this far in the future at open.
#[cfg(not(feature = "integration-test"))]
pub const MIN_EXPIRY_LEAD_SECS: u64 = 3600;
/// Escrow expiry must be at most this far in the future at open.
pub const MAX_EXPIRY_WINDOW_SECS: u64 = 30 * 86_400;

/// One active escrow record locking a token under `(buyer, H, expiry, price)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    /// Token owner who opened the sale.
    pub seller: String,
    /// Account allowed to claim with the preimage.
    pub buyer: String,
    /// SHA-256 commitment the claim secret must open.
    pub hash: HashLock,
    /// Expiry timestamp, unix seconds. Claims need `now < expiry`.
    pub expiry: u64,
    /// Price of the BTC leg, in satoshis.
    pub price_sats: u64,
}

/// Owns the set of escrows keyed by token id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EscrowSubsystem {
    escrows: HashMap<u64, Escrow>,
}

impl EscrowSubsystem {
    /// Validates sale parameters and records the escrow.
    ///
    /// The caller (the ledger entity) has already checked ownership and the
    /// single-escrow invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        token_id: u64,
        seller: &str,
        buyer: &str,
        hash: HashLock,
        expiry: u64,
        price_sats: u64,
        now: u64,
    ) -> Result<(), LedgerError> {
        if buyer.is_empty() || is_zero_address(buyer) {
            return Err(LedgerError::InvalidBuyer);
        }
        if buyer == seller {
            return Err(LedgerError::BuyerIsSeller);
        }
        if hash.is_zero() {
            return Err(LedgerError::InvalidHash);
        }
        if price_sats == 0 {
            return Err(LedgerError::InvalidPrice);
        }
        if expiry <= now + MIN_EXPIRY_LEAD_SECS {
            return Err(LedgerError::ExpiryTooSoon);
        }
        if expiry > now + MAX_EXPIRY_WINDOW_SECS {
            return Err(LedgerError::ExpiryTooFar);
        }
        self.escrows.insert(
            token_id,
            Escrow {
                seller: seller.to_string(),
                buyer: buyer.to_string(),
                hash,
                expiry,
                price_sats,
            },
        );
        Ok(())
    }

    /// Returns the active escrow on a token, if any.
    pub fn get(&self, token_id: u64) -> Option<&Escrow> {
        self.escrows.get(&token_id)
    }

    /// True when the token is locked by an active escrow.
    pub fn is_active(&self, token_id: u64) -> bool {
        self.escrows.contains_key(&token_id)
    }

    /// Validates a claim and removes the escrow, returning the cleared record.
    ///
    /// The record is removed before the ledger entity performs the ownership
    /// transfer, so no observer can see an active escrow on a settled token.
    pub fn take_for_claim(
        &mut self,
        token_id: u64,
        caller: &str,
        preimage: &Preimage,
        now: u64,
    ) -> Result<Escrow, LedgerError> {
        let escrow = self
            .escrows
            .get(&token_id)
            .ok_or(LedgerError::NotInEscrow(token_id))?;
        if escrow.buyer != caller {
            return Err(LedgerError::NotBuyer);
        }
        if now >= escrow.expiry {
            return Err(LedgerError::Expired);
        }
        if !preimage.opens(&escrow.hash) {
            return Err(LedgerError::BadSecret);
        }
        Ok(self.escrows.remove(&token_id).expect("checked above"))
    }

    /// Validates a refund and removes the escrow, returning the cleared
    /// record. The seller may refund early; anyone may refund after expiry.
    pub fn take_for_refund(
        &mut self,
        token_id: u64,
        caller: &str,
        now: u64,
    ) -> Result<Escrow, LedgerError> {
        let escrow = self
            .escrows
            .get(&token_id)
            .ok_or(LedgerError::NotInEscrow(token_id))?;
        if caller != escrow.seller && now < escrow.expiry {
            return Err(LedgerError::RefundNotYet);
        }
        Ok(self.escrows.remove(&token_id).expect("checked above"))
    }

    /// View predicate: would `claim(token_id, S)` succeed right now?
    pub fn can_claim(&self, token_id: u64, preimage: &Preimage, now: u64) -> bool {
        match self.escrows.get(&token_id) {
            Some(escrow) => now < escrow.expiry && preimage.opens(&escrow.hash),
            None => false,
        }
    }

    /// View predicate: would an expiry-based `refund(token_id)` succeed right
    /// now?
    pub fn can_refund(&self, token_id: u64, now: u64) -> bool {
        match self.escrows.get(&token_id) {
            Some(escrow) => now >= escrow.expiry,
            None => false,
        }
    }

    /// Number of active escrows.
    pub fn active_count(&self) -> usize {
        self.escrows.len()
    }
}

fn is_zero_address(addr: &str) -> bool {
    let stripped = addr.strip_prefix("0x").unwrap_or(addr);
    !stripped.is_empty() && stripped.chars().all(|c| c == '0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn hash() -> HashLock {
        HashLock::commit(&Preimage([0xaa; 32]))
    }

    fn open_default(sub: &mut EscrowSubsystem) {
        sub.open(1, "seller", "buyer", hash(), NOW + 7200, 50_000_000, NOW)
            .unwrap();
    }

    #[test]
    fn test_open_parameter_validation() {
        let mut sub = EscrowSubsystem::default();
        let h = hash();
        assert_eq!(
            sub.open(1, "s", "", h, NOW + 7200, 1, NOW),
            Err(LedgerError::InvalidBuyer)
        );
        assert_eq!(
            sub.open(1, "s", "0x0000000000000000000000000000000000000000", h, NOW + 7200, 1, NOW),
            Err(LedgerError::InvalidBuyer)
        );
        assert_eq!(
            sub.open(1, "s", "s", h, NOW + 7200, 1, NOW),
            Err(LedgerError::BuyerIsSeller)
        );
        assert_eq!(
            sub.open(1, "s", "b", HashLock([0u8; 32]), NOW + 7200, 1, NOW),
            Err(LedgerError::InvalidHash)
        );
        assert_eq!(
            sub.open(1, "s", "b", h, NOW + 7200, 0, NOW),
            Err(LedgerError::InvalidPrice)
        );
    }

    #[test]
    fn test_expiry_window_boundaries() {
        let mut sub = EscrowSubsystem::default();
        let h = hash();
        assert_eq!(
            sub.open(1, "s", "b", h, NOW + MIN_EXPIRY_LEAD_SECS - 1, 1, NOW),
            Err(LedgerError::ExpiryTooSoon)
        );
        // Exactly the minimum lead is still too soon; the bound is strict.
        assert_eq!(
            sub.open(1, "s", "b", h, NOW + MIN_EXPIRY_LEAD_SECS, 1, NOW),
            Err(LedgerError::ExpiryTooSoon)
        );
        assert!(sub
            .open(1, "s", "b", h, NOW + MIN_EXPIRY_LEAD_SECS + 1, 1, NOW)
            .is_ok());

        let mut sub = EscrowSubsystem::default();
        assert!(sub
            .open(1, "s", "b", h, NOW + MAX_EXPIRY_WINDOW_SECS, 1, NOW)
            .is_ok());
        let mut sub = EscrowSubsystem::default();
        assert_eq!(
            sub.open(1, "s", "b", h, NOW + MAX_EXPIRY_WINDOW_SECS + 1, 1, NOW),
            Err(LedgerError::ExpiryTooFar)
        );
    }

    #[test]
    fn test_claim_happy_and_wrong_secret() {
        let mut sub = EscrowSubsystem::default();
        open_default(&mut sub);

        assert_eq!(
            sub.take_for_claim(1, "buyer", &Preimage([0xbb; 32]), NOW + 10)
                .unwrap_err(),
            LedgerError::BadSecret
        );
        assert!(sub.is_active(1));

        let escrow = sub
            .take_for_claim(1, "buyer", &Preimage([0xaa; 32]), NOW + 10)
            .unwrap();
        assert_eq!(escrow.seller, "seller");
        assert!(!sub.is_active(1));
    }

    #[test]
    fn test_claim_after_expiry_rejected() {
        let mut sub = EscrowSubsystem::default();
        open_default(&mut sub);
        assert_eq!(
            sub.take_for_claim(1, "buyer", &Preimage([0xaa; 32]), NOW + 7200)
                .unwrap_err(),
            LedgerError::Expired
        );
        // Anyone may refund now.
        assert!(sub.take_for_refund(1, "rando", NOW + 7200).is_ok());
    }

    #[test]
    fn test_claim_requires_buyer() {
        let mut sub = EscrowSubsystem::default();
        open_default(&mut sub);
        assert_eq!(
            sub.take_for_claim(1, "mallory", &Preimage([0xaa; 32]), NOW + 10)
                .unwrap_err(),
            LedgerError::NotBuyer
        );
    }

    #[test]
    fn test_refund_early_only_by_seller() {
        let mut sub = EscrowSubsystem::default();
        open_default(&mut sub);
        assert_eq!(
            sub.take_for_refund(1, "rando", NOW + 10).unwrap_err(),
            LedgerError::RefundNotYet
        );
        assert!(sub.take_for_refund(1, "seller", NOW + 10).is_ok());
        assert_eq!(
            sub.take_for_refund(1, "seller", NOW + 10).unwrap_err(),
            LedgerError::NotInEscrow(1)
        );
    }

    #[test]
    fn test_view_predicates() {
        let mut sub = EscrowSubsystem::default();
        open_default(&mut sub);
        let good = Preimage([0xaa; 32]);
        let bad = Preimage([0xbb; 32]);

        assert!(sub.can_claim(1, &good, NOW + 10));
        assert!(!sub.can_claim(1, &bad, NOW + 10));
        assert!(!sub.can_claim(1, &good, NOW + 7200));
        assert!(!sub.can_refund(1, NOW + 7199));
        assert!(sub.can_refund(1, NOW + 7200));
        assert!(!sub.can_claim(2, &good, NOW));
        assert!(!sub.can_refund(2, NOW + 7200));
    }
}
