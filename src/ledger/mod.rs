//! The asset-side HTLC ledger.
//!
//! A single entity combining two capabilities: the token registry (ownership
//! and metadata) and the escrow subsystem (hash-locked sales). All
//! authorization and state preconditions live here; every state change emits
//! the corresponding raw log so the normalizer and actuator see the same
//! surface a deployed contract would expose.

pub mod error;
pub mod escrow;
pub mod events;
pub mod normalizer;
pub mod token;

use crate::protocol::hashlock::{HashLock, Preimage};

use error::LedgerError;
use escrow::{Escrow, EscrowSubsystem};
use events::{LogPosition, RawLedgerLog};
use token::{Token, TokenMeta, TokenRegistry};

/// In-process asset HTLC ledger state machine.
///
/// Methods take the calling account and the ledger timestamp (`now`)
/// explicitly; block time is an input of the state machine, wall-clock never
/// leaks in. Each mutating call is one ledger transaction occupying its own
/// block.
#[derive(Debug, Default)]
pub struct AssetHtlcLedger {
    registry: TokenRegistry,
    escrow: EscrowSubsystem,
    log: Vec<RawLedgerLog>,
    block_number: u64,
}

impl AssetHtlcLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_block(&mut self) -> (u64, String) {
        self.block_number += 1;
        (self.block_number, format!("atx{:08}", self.block_number))
    }

    /// Creates a token owned by `caller`; emits `Minted` and, when the
    /// metadata carries a note, `NoteAdded`.
    pub fn mint(
        &mut self,
        caller: &str,
        token_id: u64,
        meta: TokenMeta,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        self.registry.mint(caller, token_id, meta.clone())?;
        let (block, txid) = self.next_block();
        let mut emitted = vec![RawLedgerLog::minted(
            LogPosition {
                block_number: block,
                log_index: 0,
                txid: &txid,
                timestamp: now,
            },
            token_id,
            caller,
            &meta.title,
            &meta.category,
        )];
        if !meta.note.is_empty() {
            emitted.push(RawLedgerLog::note_added(
                LogPosition {
                    block_number: block,
                    log_index: 1,
                    txid: &txid,
                    timestamp: now,
                },
                token_id,
                caller,
                &meta.note,
            ));
        }
        self.log.extend(emitted.iter().cloned());
        Ok(emitted)
    }

    /// Updates the owner note; emits `NoteAdded`.
    pub fn set_note(
        &mut self,
        caller: &str,
        token_id: u64,
        note: &str,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        self.ensure_not_in_escrow_for_owner_op(caller, token_id)?;
        self.registry.set_note(caller, token_id, note)?;
        Ok(self.emit_one(|pos| RawLedgerLog::note_added(pos, token_id, caller, note), now))
    }

    /// Permanently freezes metadata; emits `MetadataFrozen`.
    pub fn freeze_metadata(
        &mut self,
        caller: &str,
        token_id: u64,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        self.ensure_not_in_escrow_for_owner_op(caller, token_id)?;
        self.registry.freeze(caller, token_id)?;
        Ok(self.emit_one(|pos| RawLedgerLog::metadata_frozen(pos, token_id, caller), now))
    }

    /// Opens a hash-locked sale; emits `SaleOpen`.
    #[allow(clippy::too_many_arguments)]
    pub fn sale_open(
        &mut self,
        caller: &str,
        token_id: u64,
        buyer: &str,
        hash: HashLock,
        expiry: u64,
        price_sats: u64,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        if self.registry.owner_of(token_id)? != caller {
            return Err(LedgerError::NotOwner);
        }
        if self.escrow.is_active(token_id) {
            return Err(LedgerError::InEscrow);
        }
        self.escrow
            .open(token_id, caller, buyer, hash, expiry, price_sats, now)?;
        Ok(self.emit_one(
            |pos| RawLedgerLog::sale_open(pos, token_id, caller, buyer, &hash, price_sats, expiry),
            now,
        ))
    }

    /// Settles a sale with the revealed secret; emits `SaleSettle`.
    ///
    /// The escrow record is cleared before the ownership transfer; no
    /// transfer hook can ever observe an active escrow on a settled token.
    pub fn claim(
        &mut self,
        caller: &str,
        token_id: u64,
        preimage: Preimage,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        let cleared = self.escrow.take_for_claim(token_id, caller, &preimage, now)?;
        self.registry.set_owner(token_id, &cleared.buyer)?;
        Ok(self.emit_one(
            |pos| {
                RawLedgerLog::sale_settle(
                    pos,
                    token_id,
                    &cleared.seller,
                    &cleared.buyer,
                    &cleared.hash,
                    &preimage,
                )
            },
            now,
        ))
    }

    /// Aborts a sale; the seller keeps the token. Emits `SaleRefund`.
    ///
    /// Same ordering discipline as `claim`: the escrow is cleared first.
    pub fn refund(
        &mut self,
        caller: &str,
        token_id: u64,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        let cleared = self.escrow.take_for_refund(token_id, caller, now)?;
        Ok(self.emit_one(
            |pos| {
                RawLedgerLog::sale_refund(
                    pos,
                    token_id,
                    &cleared.seller,
                    &cleared.buyer,
                    &cleared.hash,
                )
            },
            now,
        ))
    }

    /// Moves a token outside a sale; emits `Transfer`. Fails while the token
    /// is locked in escrow.
    pub fn transfer(
        &mut self,
        caller: &str,
        to: &str,
        token_id: u64,
        now: u64,
    ) -> Result<Vec<RawLedgerLog>, LedgerError> {
        let owner = self.registry.owner_of(token_id)?.to_string();
        if owner != caller {
            return Err(LedgerError::NotAuthorized);
        }
        if self.escrow.is_active(token_id) {
            return Err(LedgerError::InEscrow);
        }
        self.registry.set_owner(token_id, to)?;
        Ok(self.emit_one(|pos| RawLedgerLog::transfer(pos, &owner, to, token_id), now))
    }

    fn ensure_not_in_escrow_for_owner_op(
        &self,
        caller: &str,
        token_id: u64,
    ) -> Result<(), LedgerError> {
        if self.registry.owner_of(token_id)? != caller {
            return Err(LedgerError::NotOwner);
        }
        if self.escrow.is_active(token_id) {
            return Err(LedgerError::InEscrow);
        }
        Ok(())
    }

    fn emit_one(
        &mut self,
        build: impl FnOnce(LogPosition<'_>) -> RawLedgerLog,
        now: u64,
    ) -> Vec<RawLedgerLog> {
        let (block, txid) = self.next_block();
        let log = build(LogPosition {
            block_number: block,
            log_index: 0,
            txid: &txid,
            timestamp: now,
        });
        self.log.push(log.clone());
        vec![log]
    }

    // View surface.

    /// True when the token is locked by an active escrow.
    pub fn is_in_escrow(&self, token_id: u64) -> bool {
        self.escrow.is_active(token_id)
    }

    /// The active escrow on a token, if any.
    pub fn get_escrow(&self, token_id: u64) -> Option<&Escrow> {
        self.escrow.get(token_id)
    }

    /// Would `claim(token_id, S)` succeed right now?
    pub fn can_claim(&self, token_id: u64, preimage: &Preimage, now: u64) -> bool {
        self.escrow.can_claim(token_id, preimage, now)
    }

    /// Would an expiry-based refund succeed right now?
    pub fn can_refund(&self, token_id: u64, now: u64) -> bool {
        self.escrow.can_refund(token_id, now)
    }

    /// Current owner of a token.
    pub fn owner_of(&self, token_id: u64) -> Result<&str, LedgerError> {
        self.registry.owner_of(token_id)
    }

    /// The token record.
    pub fn token(&self, token_id: u64) -> Result<&Token, LedgerError> {
        self.registry.get(token_id)
    }

    /// Full raw log, in emission order.
    pub fn logs(&self) -> &[RawLedgerLog] {
        &self.log
    }

    /// Raw logs from the given offset on, for incremental consumers.
    pub fn logs_since(&self, offset: usize) -> &[RawLedgerLog] {
        &self.log[offset.min(self.log.len())..]
    }

    /// Number of active escrows.
    pub fn active_escrows(&self) -> usize {
        self.escrow.active_count()
    }

    /// Current ledger block height.
    pub fn block_height(&self) -> u64 {
        self.block_number
    }
}
