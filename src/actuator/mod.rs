//! Asset-ledger actuator: a thin façade submitting escrow operations and
//! parsing the emitted events into the authoritative post-state.
//!
//! One call is one attempt. The actuator estimates resources (with a 20 %
//! buffer over the estimate, falling back to a configured ceiling), submits
//! with a per-attempt timeout, and decodes the returned logs. All retry
//! policy lives in the coordinator.

pub mod embedded;
pub mod error;

use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use crate::{
    ledger::{
        error::LedgerError,
        escrow::Escrow,
        events::RawLedgerLog,
        normalizer::{AssetLedgerEvent, EventNormalizer},
    },
    protocol::hashlock::{HashLock, Preimage},
};

use error::ActuatorError;

/// Per-attempt submission timeout.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra resource margin applied over the estimate, in percent.
pub const UNIT_BUFFER_PERCENT: u64 = 20;

/// Operations the coordinator submits against the asset ledger.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Open a hash-locked sale escrow.
    OpenEscrow {
        /// Token to lock.
        token_id: u64,
        /// Seller account the sale is submitted for.
        seller: String,
        /// Buyer allowed to claim.
        buyer: String,
        /// Hash commitment.
        hash: HashLock,
        /// Escrow expiry, unix seconds.
        expiry: u64,
        /// Price in satoshis.
        price_sats: u64,
    },
    /// Settle a sale with the revealed secret.
    Claim {
        /// Token under escrow.
        token_id: u64,
        /// The revealed secret.
        preimage: Preimage,
    },
    /// Abort a sale.
    Refund {
        /// Token under escrow.
        token_id: u64,
    },
}

impl LedgerOp {
    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerOp::OpenEscrow { .. } => "open_escrow",
            LedgerOp::Claim { .. } => "claim",
            LedgerOp::Refund { .. } => "refund",
        }
    }
}

/// One submission attempt's failure as reported by a client.
#[derive(Debug)]
pub enum SubmitError {
    /// The ledger evaluated and rejected the operation.
    Rejected(LedgerError),
    /// The operation never reached a decision (connectivity, node down, …).
    Transport(String),
}

/// Access to an asset ledger, local or remote.
///
/// The embedded implementation drives the in-process ledger; a remote
/// implementation would submit signed transactions over RPC. The actuator
/// only depends on this seam.
pub trait LedgerClient: Send + Sync {
    /// Estimated resource units for an operation. An `Err` triggers the
    /// configured ceiling fallback.
    fn estimate_units(&self, op: &LedgerOp) -> Result<u64, String>;
    /// Submits the operation, waits for inclusion, returns emitted logs.
    fn submit(&self, op: &LedgerOp, max_units: u64) -> Result<Vec<RawLedgerLog>, SubmitError>;
    /// Whether the token currently has an active escrow.
    fn is_in_escrow(&self, token_id: u64) -> Result<bool, String>;
    /// The active escrow record, if any.
    fn get_escrow(&self, token_id: u64) -> Result<Option<Escrow>, String>;
    /// Current owner of the token.
    fn get_owner(&self, token_id: u64) -> Result<Option<String>, String>;
}

/// Authoritative post-state of a successful escrow open.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    /// Ledger transaction that opened the escrow.
    pub txid: String,
    /// Recorded expiry.
    pub expiry: u64,
}

/// Authoritative post-state of a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    /// Ledger transaction that settled the sale.
    pub txid: String,
    /// The buyer the token was transferred to.
    pub buyer: String,
}

/// Authoritative post-state of a successful refund.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    /// Ledger transaction that refunded the sale.
    pub txid: String,
    /// The seller who keeps the token.
    pub seller: String,
}

/// The actuator façade.
#[derive(Clone)]
pub struct AssetActuator {
    client: Arc<dyn LedgerClient>,
    /// Resource ceiling used when estimation fails.
    unit_ceiling: u64,
    timeout: Duration,
    normalizer: Arc<Mutex<EventNormalizer>>,
}

impl AssetActuator {
    /// Wraps a ledger client with the default per-attempt timeout.
    pub fn new(client: Arc<dyn LedgerClient>, unit_ceiling: u64) -> Self {
        Self {
            client,
            unit_ceiling,
            timeout: SUBMIT_TIMEOUT,
            normalizer: Arc::new(Mutex::new(EventNormalizer::new())),
        }
    }

    /// Ledger logs dropped as unrecognized while decoding submissions.
    pub fn dropped_logs(&self) -> u64 {
        self.normalizer.lock().map(|n| n.dropped()).unwrap_or(0)
    }

    /// Overrides the per-attempt timeout (test hook).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submits `open_escrow` and parses the `SaleOpen` event.
    pub fn open_escrow(
        &self,
        token_id: u64,
        seller: &str,
        buyer: &str,
        hash: HashLock,
        expiry: u64,
        price_sats: u64,
    ) -> Result<OpenOutcome, ActuatorError> {
        let op = LedgerOp::OpenEscrow {
            token_id,
            seller: seller.to_string(),
            buyer: buyer.to_string(),
            hash,
            expiry,
            price_sats,
        };
        let logs = self.submit_with_timeout(op)?;
        let events = self.decode(&logs);
        for ev in &events {
            if let AssetLedgerEvent::SaleOpen { expiry, .. } = &ev.event {
                return Ok(OpenOutcome {
                    txid: ev.txid.clone(),
                    expiry: *expiry,
                });
            }
        }
        Err(ActuatorError::ParseFailure("no SaleOpen event emitted"))
    }

    /// Submits `claim` and parses the `SaleSettle` event for the buyer.
    pub fn claim(&self, token_id: u64, preimage: Preimage) -> Result<ClaimOutcome, ActuatorError> {
        let logs = self.submit_with_timeout(LedgerOp::Claim { token_id, preimage })?;
        let events = self.decode(&logs);
        for ev in &events {
            if let AssetLedgerEvent::SaleSettle { buyer, .. } = &ev.event {
                return Ok(ClaimOutcome {
                    txid: ev.txid.clone(),
                    buyer: buyer.clone(),
                });
            }
        }
        Err(ActuatorError::ParseFailure("no SaleSettle event emitted"))
    }

    /// Submits `refund` and parses the `SaleRefund` event for the seller.
    pub fn refund(&self, token_id: u64) -> Result<RefundOutcome, ActuatorError> {
        let logs = self.submit_with_timeout(LedgerOp::Refund { token_id })?;
        let events = self.decode(&logs);
        for ev in &events {
            if let AssetLedgerEvent::SaleRefund { seller, .. } = &ev.event {
                return Ok(RefundOutcome {
                    txid: ev.txid.clone(),
                    seller: seller.clone(),
                });
            }
        }
        Err(ActuatorError::ParseFailure("no SaleRefund event emitted"))
    }

    /// Whether the token currently has an active escrow.
    pub fn is_in_escrow(&self, token_id: u64) -> Result<bool, ActuatorError> {
        self.client
            .is_in_escrow(token_id)
            .map_err(ActuatorError::Transport)
    }

    /// The active escrow record, if any.
    pub fn get_escrow(&self, token_id: u64) -> Result<Option<Escrow>, ActuatorError> {
        self.client
            .get_escrow(token_id)
            .map_err(ActuatorError::Transport)
    }

    /// Current owner of the token.
    pub fn get_owner(&self, token_id: u64) -> Result<Option<String>, ActuatorError> {
        self.client
            .get_owner(token_id)
            .map_err(ActuatorError::Transport)
    }

    fn budget_units(&self, op: &LedgerOp) -> u64 {
        match self.client.estimate_units(op) {
            Ok(estimate) => estimate + estimate * UNIT_BUFFER_PERCENT / 100,
            Err(e) => {
                log::warn!(
                    "Resource estimation failed for {} ({e}), using ceiling {}",
                    op.name(),
                    self.unit_ceiling
                );
                self.unit_ceiling
            }
        }
    }

    /// Runs the submission on a worker so a hung ledger node cannot wedge
    /// the caller past the per-attempt timeout.
    fn submit_with_timeout(&self, op: LedgerOp) -> Result<Vec<RawLedgerLog>, ActuatorError> {
        let max_units = self.budget_units(&op);
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel();
        let op_name = op.name();

        let spawned = thread::Builder::new()
            .name(format!("actuator-{op_name}"))
            .spawn(move || {
                let _ = tx.send(client.submit(&op, max_units));
            });
        if spawned.is_err() {
            return Err(ActuatorError::Transport("worker spawn failed".to_string()));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(SubmitError::Rejected(e))) => Err(ActuatorError::LedgerRejected(e)),
            Ok(Err(SubmitError::Transport(e))) => Err(ActuatorError::Transport(e)),
            Err(_) => {
                log::error!("Ledger submission {op_name} exceeded {:?}", self.timeout);
                Err(ActuatorError::Timeout)
            }
        }
    }
}

impl AssetActuator {
    fn decode(&self, logs: &[RawLedgerLog]) -> Vec<crate::ledger::normalizer::NormalizedEvent> {
        match self.normalizer.lock() {
            Ok(mut normalizer) => normalizer.normalize(logs),
            Err(_) => EventNormalizer::new().normalize(logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actuator::embedded::EmbeddedLedger,
        ledger::{token::TokenMeta, AssetHtlcLedger},
        utill::now_secs,
    };
    use std::sync::Mutex;

    fn setup() -> (Arc<Mutex<AssetHtlcLedger>>, AssetActuator, Preimage, HashLock) {
        let preimage = Preimage([0xaa; 32]);
        let hash = HashLock::commit(&preimage);

        let mut ledger = AssetHtlcLedger::new();
        ledger
            .mint(
                "seller",
                1,
                TokenMeta {
                    title: "2019 Audi A4".to_string(),
                    ..TokenMeta::default()
                },
                now_secs(),
            )
            .unwrap();
        let ledger = Arc::new(Mutex::new(ledger));
        let client = EmbeddedLedger::new(ledger.clone(), "coordinator");
        let actuator = AssetActuator::new(Arc::new(client), 500_000);
        (ledger, actuator, preimage, hash)
    }

    #[test]
    fn test_open_claim_roundtrip() {
        let (ledger, actuator, preimage, hash) = setup();
        let expiry = now_secs() + 7200;

        let opened = actuator
            .open_escrow(1, "seller", "buyer", hash, expiry, 50_000_000)
            .unwrap();
        assert_eq!(opened.expiry, expiry);
        assert!(actuator.is_in_escrow(1).unwrap());

        let claimed = actuator.claim(1, preimage).unwrap();
        assert_eq!(claimed.buyer, "buyer");
        assert_eq!(ledger.lock().unwrap().owner_of(1).unwrap(), "buyer");
    }

    #[test]
    fn test_refund_outcome_names_seller() {
        let (_ledger, actuator, _preimage, hash) = setup();
        actuator
            .open_escrow(1, "seller", "buyer", hash, now_secs() + 7200, 1_000)
            .unwrap();
        let refunded = actuator.refund(1).unwrap();
        assert_eq!(refunded.seller, "seller");
        assert!(!actuator.is_in_escrow(1).unwrap());
    }

    #[test]
    fn test_rejection_not_retryable() {
        let (_ledger, actuator, preimage, _hash) = setup();
        // No escrow open.
        let err = actuator.claim(1, preimage).unwrap_err();
        assert!(matches!(err, ActuatorError::LedgerRejected(_)));
        assert!(!err.is_retryable());
    }

    struct HangingClient;
    impl LedgerClient for HangingClient {
        fn estimate_units(&self, _op: &LedgerOp) -> Result<u64, String> {
            Err("estimator offline".to_string())
        }
        fn submit(&self, _op: &LedgerOp, _max: u64) -> Result<Vec<RawLedgerLog>, SubmitError> {
            thread::sleep(Duration::from_secs(5));
            Err(SubmitError::Transport("never".to_string()))
        }
        fn is_in_escrow(&self, _token_id: u64) -> Result<bool, String> {
            Ok(false)
        }
        fn get_escrow(&self, _token_id: u64) -> Result<Option<Escrow>, String> {
            Ok(None)
        }
        fn get_owner(&self, _token_id: u64) -> Result<Option<String>, String> {
            Ok(None)
        }
    }

    #[test]
    fn test_timeout_is_retryable() {
        let actuator = AssetActuator::new(Arc::new(HangingClient), 500_000)
            .with_timeout(Duration::from_millis(50));
        let err = actuator.refund(1).unwrap_err();
        assert!(matches!(err, ActuatorError::Timeout));
        assert!(err.is_retryable());
    }
}
