//! Raw ledger logs as emitted by the asset HTLC contract surface.
//!
//! A raw log is schema name plus loosely-typed fields, the shape an indexer
//! receives from a ledger node. The normalizer turns these into the closed
//! [`AssetLedgerEvent`](super::normalizer::AssetLedgerEvent) variants.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::hashlock::{HashLock, Preimage};

/// One raw log entry from the asset ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLedgerLog {
    /// Event schema name (`Minted`, `Transfer`, `SaleOpen`, …).
    pub schema: String,
    /// Block that included the emitting transaction.
    pub block_number: u64,
    /// Position of this log within the block.
    pub log_index: u32,
    /// Transaction id on the asset ledger.
    pub txid: String,
    /// Block timestamp, unix seconds. Authoritative for ordering.
    pub timestamp: u64,
    /// Schema-specific fields.
    pub fields: Value,
}

/// Positional context for a log being emitted.
#[derive(Debug, Clone, Copy)]
pub struct LogPosition<'a> {
    /// Block number of the emitting transaction.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u32,
    /// Transaction id.
    pub txid: &'a str,
    /// Block timestamp.
    pub timestamp: u64,
}

impl RawLedgerLog {
    fn at(pos: LogPosition<'_>, schema: &str, fields: Value) -> Self {
        RawLedgerLog {
            schema: schema.to_string(),
            block_number: pos.block_number,
            log_index: pos.log_index,
            txid: pos.txid.to_string(),
            timestamp: pos.timestamp,
            fields,
        }
    }

    /// `Minted(tokenId, owner, title, category)`
    pub fn minted(pos: LogPosition<'_>, token_id: u64, owner: &str, title: &str, category: &str) -> Self {
        Self::at(
            pos,
            "Minted",
            json!({ "tokenId": token_id, "owner": owner, "title": title, "category": category }),
        )
    }

    /// `Transfer(from, to, tokenId)`
    pub fn transfer(pos: LogPosition<'_>, from: &str, to: &str, token_id: u64) -> Self {
        Self::at(
            pos,
            "Transfer",
            json!({ "from": from, "to": to, "tokenId": token_id }),
        )
    }

    /// `NoteAdded(tokenId, owner, note)`
    pub fn note_added(pos: LogPosition<'_>, token_id: u64, owner: &str, note: &str) -> Self {
        Self::at(
            pos,
            "NoteAdded",
            json!({ "tokenId": token_id, "owner": owner, "note": note }),
        )
    }

    /// `MetadataFrozen(tokenId, owner)`
    pub fn metadata_frozen(pos: LogPosition<'_>, token_id: u64, owner: &str) -> Self {
        Self::at(
            pos,
            "MetadataFrozen",
            json!({ "tokenId": token_id, "owner": owner }),
        )
    }

    /// `SaleOpen(tokenId, seller, buyer, hashH, priceBTC, expiryTimestamp)`
    pub fn sale_open(
        pos: LogPosition<'_>,
        token_id: u64,
        seller: &str,
        buyer: &str,
        hash: &HashLock,
        price_sats: u64,
        expiry: u64,
    ) -> Self {
        Self::at(
            pos,
            "SaleOpen",
            json!({
                "tokenId": token_id,
                "seller": seller,
                "buyer": buyer,
                "hashH": hash.to_string(),
                "priceBTC": price_sats,
                "expiryTimestamp": expiry,
            }),
        )
    }

    /// `SaleSettle(tokenId, seller, buyer, hashH, secretS)`
    pub fn sale_settle(
        pos: LogPosition<'_>,
        token_id: u64,
        seller: &str,
        buyer: &str,
        hash: &HashLock,
        secret: &Preimage,
    ) -> Self {
        Self::at(
            pos,
            "SaleSettle",
            json!({
                "tokenId": token_id,
                "seller": seller,
                "buyer": buyer,
                "hashH": hash.to_string(),
                "secretS": secret.to_string(),
            }),
        )
    }

    /// `SaleRefund(tokenId, seller, buyer, hashH)`
    pub fn sale_refund(
        pos: LogPosition<'_>,
        token_id: u64,
        seller: &str,
        buyer: &str,
        hash: &HashLock,
    ) -> Self {
        Self::at(
            pos,
            "SaleRefund",
            json!({
                "tokenId": token_id,
                "seller": seller,
                "buyer": buyer,
                "hashH": hash.to_string(),
            }),
        )
    }
}
