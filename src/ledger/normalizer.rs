//! Translates raw ledger logs into canonical, chain-ordered swap events.
//!
//! Unrecognized schemas are dropped with a counter; mint-time `Transfer`
//! entries from the zero address are discarded as redundant with `Minted`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::hashlock::{HashLock, Preimage};

use super::events::RawLedgerLog;

/// The closed set of swap-relevant ledger events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssetLedgerEvent {
    /// A token was created.
    Minted {
        /// Initial owner.
        owner: String,
        /// Token title at mint.
        title: String,
        /// Token category at mint.
        category: String,
    },
    /// Ownership moved outside a sale.
    Transfer {
        /// Previous owner.
        from: String,
        /// New owner.
        to: String,
    },
    /// The owner updated the token note.
    NoteAdded {
        /// Owner at the time of the update.
        owner: String,
        /// New note text.
        note: String,
    },
    /// Metadata was permanently frozen.
    MetadataFrozen {
        /// Owner who froze it.
        owner: String,
    },
    /// An escrow was opened.
    SaleOpen {
        /// Token owner who opened the sale.
        seller: String,
        /// Account allowed to claim.
        buyer: String,
        /// Hash commitment.
        hash: HashLock,
        /// Price in satoshis.
        price_sats: u64,
        /// Escrow expiry, unix seconds.
        expiry: u64,
    },
    /// The buyer claimed with the correct secret.
    SaleSettle {
        /// Seller side of the settled sale.
        seller: String,
        /// Buyer who now owns the token.
        buyer: String,
        /// Hash commitment.
        hash: HashLock,
        /// Revealed secret.
        secret: Preimage,
    },
    /// The escrow was refunded; the seller keeps the token.
    SaleRefund {
        /// Seller who keeps the token.
        seller: String,
        /// Buyer side of the aborted sale.
        buyer: String,
        /// Hash commitment.
        hash: HashLock,
    },
}

/// A canonical event with its chain position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Token the event concerns.
    pub token_id: u64,
    /// Emitting transaction id.
    pub txid: String,
    /// Block number; primary ordering key.
    pub block_number: u64,
    /// Log index; secondary ordering key.
    pub log_index: u32,
    /// Block timestamp (authoritative; wall-clock is never used).
    pub timestamp: u64,
    /// The decoded event.
    pub event: AssetLedgerEvent,
}

/// Asset-side sale state derived by folding events in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleProjection {
    /// No sale has been opened on the token.
    NoSale,
    /// An escrow is open and unsettled.
    Open,
    /// The sale settled to the buyer.
    Settled,
    /// The escrow was refunded.
    Refunded,
}

/// Stateful normalizer keeping the dropped-log counter across batches.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    dropped: u64,
}

impl EventNormalizer {
    /// Creates a normalizer with a zeroed drop counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw logs whose schema was not recognized so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decodes a batch of raw logs and returns them sorted by
    /// `(block_number, log_index)`.
    pub fn normalize(&mut self, logs: &[RawLedgerLog]) -> Vec<NormalizedEvent> {
        let mut events: Vec<NormalizedEvent> = Vec::with_capacity(logs.len());
        for log in logs {
            match decode_log(log) {
                Decoded::Event(ev) => events.push(ev),
                Decoded::RedundantMintTransfer => {}
                Decoded::Unrecognized => {
                    self.dropped += 1;
                    log::debug!(
                        "Dropping unrecognized ledger log schema={} txid={}",
                        log.schema,
                        log.txid
                    );
                }
            }
        }
        events.sort_by_key(|ev| (ev.block_number, ev.log_index));
        events
    }
}

enum Decoded {
    Event(NormalizedEvent),
    RedundantMintTransfer,
    Unrecognized,
}

fn decode_log(log: &RawLedgerLog) -> Decoded {
    let fields = &log.fields;
    let Some(token_id) = get_u64(fields, "tokenId") else {
        return Decoded::Unrecognized;
    };

    let event = match log.schema.as_str() {
        "Minted" => AssetLedgerEvent::Minted {
            owner: get_str(fields, "owner"),
            title: get_str(fields, "title"),
            category: get_str(fields, "category"),
        },
        "Transfer" => {
            let from = get_str(fields, "from");
            if is_zero_address(&from) {
                return Decoded::RedundantMintTransfer;
            }
            AssetLedgerEvent::Transfer {
                from,
                to: get_str(fields, "to"),
            }
        }
        "NoteAdded" => AssetLedgerEvent::NoteAdded {
            owner: get_str(fields, "owner"),
            note: get_str(fields, "note"),
        },
        "MetadataFrozen" => AssetLedgerEvent::MetadataFrozen {
            owner: get_str(fields, "owner"),
        },
        "SaleOpen" => {
            let Some(hash) = get_hash(fields, "hashH") else {
                return Decoded::Unrecognized;
            };
            AssetLedgerEvent::SaleOpen {
                seller: get_str(fields, "seller"),
                buyer: get_str(fields, "buyer"),
                hash,
                price_sats: get_u64(fields, "priceBTC").unwrap_or(0),
                expiry: get_u64(fields, "expiryTimestamp").unwrap_or(0),
            }
        }
        "SaleSettle" => {
            let Some(hash) = get_hash(fields, "hashH") else {
                return Decoded::Unrecognized;
            };
            let Some(secret) = get_str_opt(fields, "secretS")
                .and_then(|s| Preimage::from_str(&s).ok())
            else {
                return Decoded::Unrecognized;
            };
            AssetLedgerEvent::SaleSettle {
                seller: get_str(fields, "seller"),
                buyer: get_str(fields, "buyer"),
                hash,
                secret,
            }
        }
        "SaleRefund" => {
            let Some(hash) = get_hash(fields, "hashH") else {
                return Decoded::Unrecognized;
            };
            AssetLedgerEvent::SaleRefund {
                seller: get_str(fields, "seller"),
                buyer: get_str(fields, "buyer"),
                hash,
            }
        }
        _ => return Decoded::Unrecognized,
    };

    Decoded::Event(NormalizedEvent {
        token_id,
        txid: log.txid.clone(),
        block_number: log.block_number,
        log_index: log.log_index,
        timestamp: log.timestamp,
        event,
    })
}

/// Current owner of a token per the event history: the buyer of the most
/// recent `SaleSettle`, else the `to` of the most recent `Transfer`, else the
/// minter.
pub fn current_owner(events: &[NormalizedEvent], token_id: u64) -> Option<String> {
    let mut minter = None;
    let mut last_transfer_to = None;
    let mut last_settle_buyer = None;
    for ev in events.iter().filter(|ev| ev.token_id == token_id) {
        match &ev.event {
            AssetLedgerEvent::Minted { owner, .. } => minter = Some(owner.clone()),
            AssetLedgerEvent::Transfer { to, .. } => last_transfer_to = Some(to.clone()),
            AssetLedgerEvent::SaleSettle { buyer, .. } => last_settle_buyer = Some(buyer.clone()),
            _ => {}
        }
    }
    last_settle_buyer.or(last_transfer_to).or(minter)
}

/// Folds sale events in chain order into the token's current sale state.
pub fn project_sale(events: &[NormalizedEvent], token_id: u64) -> SaleProjection {
    let mut state = SaleProjection::NoSale;
    for ev in events.iter().filter(|ev| ev.token_id == token_id) {
        match &ev.event {
            AssetLedgerEvent::SaleOpen { .. } => state = SaleProjection::Open,
            AssetLedgerEvent::SaleSettle { .. } => state = SaleProjection::Settled,
            AssetLedgerEvent::SaleRefund { .. } => state = SaleProjection::Refunded,
            _ => {}
        }
    }
    state
}

fn is_zero_address(addr: &str) -> bool {
    let stripped = addr.strip_prefix("0x").unwrap_or(addr);
    stripped.is_empty() || stripped.chars().all(|c| c == '0')
}

fn get_u64(fields: &Value, key: &str) -> Option<u64> {
    fields.get(key).and_then(Value::as_u64)
}

fn get_str(fields: &Value, key: &str) -> String {
    get_str_opt(fields, key).unwrap_or_default()
}

fn get_str_opt(fields: &Value, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

fn get_hash(fields: &Value, key: &str) -> Option<HashLock> {
    get_str_opt(fields, key).and_then(|s| HashLock::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::events::LogPosition;
    use serde_json::json;

    fn pos(block: u64, index: u32) -> LogPosition<'static> {
        LogPosition {
            block_number: block,
            log_index: index,
            txid: "atx1",
            timestamp: 1_700_000_000 + block,
        }
    }

    fn hash() -> HashLock {
        HashLock::commit(&Preimage([0xaa; 32]))
    }

    #[test]
    fn test_normalize_sorts_by_block_then_index() {
        let mut n = EventNormalizer::new();
        let logs = vec![
            RawLedgerLog::note_added(pos(3, 0), 1, "a", "late"),
            RawLedgerLog::minted(pos(1, 0), 1, "a", "t", "c"),
            RawLedgerLog::note_added(pos(1, 1), 1, "a", "early"),
        ];
        let events = n.normalize(&logs);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].event, AssetLedgerEvent::Minted { .. }));
        assert_eq!(events[1].block_number, 1);
        assert_eq!(events[1].log_index, 1);
        assert_eq!(events[2].block_number, 3);
    }

    #[test]
    fn test_zero_address_transfer_discarded_without_counting() {
        let mut n = EventNormalizer::new();
        let logs = vec![
            RawLedgerLog::transfer(pos(1, 0), "0x0000000000000000000000000000000000000000", "a", 1),
            RawLedgerLog::transfer(pos(2, 0), "a", "b", 1),
        ];
        let events = n.normalize(&logs);
        assert_eq!(events.len(), 1);
        assert_eq!(n.dropped(), 0);
        assert!(
            matches!(&events[0].event, AssetLedgerEvent::Transfer { from, .. } if from == "a")
        );
    }

    #[test]
    fn test_unknown_schema_counted() {
        let mut n = EventNormalizer::new();
        let logs = vec![RawLedgerLog {
            schema: "ApprovalForAll".to_string(),
            block_number: 1,
            log_index: 0,
            txid: "atx9".to_string(),
            timestamp: 0,
            fields: json!({ "tokenId": 1 }),
        }];
        assert!(n.normalize(&logs).is_empty());
        assert_eq!(n.dropped(), 1);
    }

    #[test]
    fn test_sale_events_decode() {
        let mut n = EventNormalizer::new();
        let secret = Preimage([0xaa; 32]);
        let logs = vec![
            RawLedgerLog::sale_open(pos(1, 0), 1, "s", "b", &hash(), 50_000_000, 1_700_007_200),
            RawLedgerLog::sale_settle(pos(2, 0), 1, "s", "b", &hash(), &secret),
        ];
        let events = n.normalize(&logs);
        assert!(matches!(
            &events[0].event,
            AssetLedgerEvent::SaleOpen { price_sats: 50_000_000, .. }
        ));
        assert!(
            matches!(&events[1].event, AssetLedgerEvent::SaleSettle { secret: s, .. } if *s == secret)
        );
    }

    #[test]
    fn test_owner_projection_precedence() {
        let mut n = EventNormalizer::new();
        let secret = Preimage([0xaa; 32]);
        let logs = vec![RawLedgerLog::minted(pos(1, 0), 1, "minter", "t", "c")];
        assert_eq!(
            current_owner(&n.normalize(&logs), 1),
            Some("minter".to_string())
        );

        let logs = vec![
            RawLedgerLog::minted(pos(1, 0), 1, "minter", "t", "c"),
            RawLedgerLog::transfer(pos(2, 0), "minter", "alice", 1),
        ];
        assert_eq!(
            current_owner(&n.normalize(&logs), 1),
            Some("alice".to_string())
        );

        let logs = vec![
            RawLedgerLog::minted(pos(1, 0), 1, "minter", "t", "c"),
            RawLedgerLog::transfer(pos(2, 0), "minter", "alice", 1),
            RawLedgerLog::sale_settle(pos(3, 0), 1, "alice", "buyer", &hash(), &secret),
        ];
        assert_eq!(
            current_owner(&n.normalize(&logs), 1),
            Some("buyer".to_string())
        );
        assert_eq!(current_owner(&n.normalize(&logs), 2), None);
    }

    #[test]
    fn test_sale_projection_fold() {
        let mut n = EventNormalizer::new();
        let logs = vec![
            RawLedgerLog::sale_open(pos(1, 0), 1, "s", "b", &hash(), 1, 1_700_007_200),
            RawLedgerLog::sale_refund(pos(2, 0), 1, "s", "b", &hash()),
        ];
        let events = n.normalize(&logs);
        assert_eq!(project_sale(&events, 1), SaleProjection::Refunded);
        assert_eq!(project_sale(&events, 2), SaleProjection::NoSale);
    }
}
