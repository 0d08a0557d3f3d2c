//! The Bitcoin observer: detects HTLC funding payments, tracks their
//! confirmations and extracts revealed preimages from spend witnesses.
//!
//! The observer is a cooperative task owning the watched-swap registry and
//! the processed-txid cache. It receives commands over a channel and
//! publishes [`ObserverEvent`]s back to the coordinator; it never touches
//! swap state itself.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        mpsc::{Receiver, Sender, TryRecvError},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    protocol::{
        hashlock::{HashLock, Preimage},
        script::preimage_from_witness,
    },
    utill::{now_secs, DUST_WARN_SATS, HEART_BEAT_INTERVAL},
};

use super::{
    api_backend::ChainSource,
    registry::{ObserverRegistry, RevealedSecret, WatchEntry},
    ws_backend::WsBackend,
};

/// Above this many unconsumed events the observer skips non-essential work
/// (secret re-scans) until the coordinator drains its inbox.
pub const INBOX_SOFT_LIMIT: usize = 1024;

/// Commands accepted by the observer.
#[derive(Debug, Clone)]
pub enum ObserverCommand {
    /// Start watching an address for a qualifying funding payment. Idempotent
    /// for a hash already being watched.
    WatchFunding {
        /// Swap identifier.
        hash: HashLock,
        /// Seller address the funding must pay.
        address: String,
        /// Minimum accepted amount in satoshis.
        min_sats: u64,
    },
    /// Forget any previously detected funding and scan from scratch. Issued
    /// by the coordinator after it downgrades a reorged swap.
    RescanFunding {
        /// Swap identifier.
        hash: HashLock,
    },
    /// Stop watching a swap (terminal state reached).
    Unwatch {
        /// Swap identifier.
        hash: HashLock,
    },
    /// Stop the observer loop.
    Shutdown,
}

/// Observations published to the coordinator.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// A qualifying funding transaction was seen (any confirmation count).
    FundingSeen {
        /// Swap identifier.
        hash: HashLock,
        /// Funding transaction id.
        txid: String,
        /// Total satoshis paid to the watched address.
        sats: u64,
    },
    /// The funding transaction reached the confirmation threshold.
    FundingConfirmed {
        /// Swap identifier.
        hash: HashLock,
        /// Funding transaction id.
        txid: String,
        /// Confirmations at the time of the check.
        confirmations: u64,
    },
    /// A previously seen funding transaction is gone from the best chain.
    FundingDropped {
        /// Swap identifier.
        hash: HashLock,
        /// The vanished transaction id.
        txid: String,
    },
    /// A spend of the funding revealed the preimage.
    SecretRevealed {
        /// Swap identifier.
        hash: HashLock,
        /// The extracted 32-byte secret.
        preimage: Preimage,
        /// Transaction that carried the witness.
        reveal_txid: String,
    },
}

/// The observer task. Owns the registry; driven by `run` on its own thread.
pub struct Observer {
    source: Box<dyn ChainSource>,
    ws: Option<WsBackend>,
    registry: ObserverRegistry,
    rx_commands: Receiver<ObserverCommand>,
    tx_events: Sender<ObserverEvent>,
    pending_events: Arc<AtomicUsize>,
    min_confirmations: u64,
    poll_interval: Duration,
}

impl Observer {
    /// Creates an observer over the given chain source.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn ChainSource>,
        ws: Option<WsBackend>,
        registry: ObserverRegistry,
        rx_commands: Receiver<ObserverCommand>,
        tx_events: Sender<ObserverEvent>,
        pending_events: Arc<AtomicUsize>,
        min_confirmations: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            ws,
            registry,
            rx_commands,
            tx_events,
            pending_events,
            min_confirmations: min_confirmations.max(1),
            poll_interval,
        }
    }

    /// Main loop: drain commands, fold in push notifications, poll the chain
    /// on the configured interval.
    pub fn run(&mut self) {
        log::info!("Observer initiated");
        let mut last_poll: Option<Instant> = None;
        let mut last_eviction = Instant::now();

        loop {
            loop {
                match self.rx_commands.try_recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            log::info!("Observer shutting down");
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::info!("Observer command channel closed, shutting down");
                        return;
                    }
                }
            }

            let mut pushed = false;
            if let Some(ws) = &self.ws {
                while let Some(event) = ws.poll() {
                    log::debug!("Push notification: {:?}", event);
                    pushed = true;
                }
            }

            let due = last_poll.map_or(true, |t| t.elapsed() >= self.poll_interval);
            if pushed || due {
                self.scan_all();
                last_poll = Some(Instant::now());
            }

            if last_eviction.elapsed() >= Duration::from_secs(3600) {
                self.registry.evict_stale(now_secs());
                last_eviction = Instant::now();
            }

            std::thread::sleep(HEART_BEAT_INTERVAL);
        }
    }

    fn handle_command(&mut self, cmd: ObserverCommand) -> bool {
        match cmd {
            ObserverCommand::WatchFunding {
                hash,
                address,
                min_sats,
            } => {
                if min_sats < DUST_WARN_SATS {
                    log::warn!(
                        "[{}] Watch price {} sats is below the dust limit",
                        hash.short(),
                        min_sats
                    );
                }
                match self.registry.get_watch(&hash) {
                    Some(existing) if existing.address == address => {
                        log::info!("[{}] Watch already registered", hash.short());
                    }
                    _ => {
                        log::info!(
                            "[{}] Watching {} for >= {} sats",
                            hash.short(),
                            address,
                            min_sats
                        );
                        self.registry
                            .upsert_watch(&WatchEntry::new(hash, address, min_sats));
                    }
                }
            }
            ObserverCommand::RescanFunding { hash } => {
                if let Some(mut entry) = self.registry.get_watch(&hash) {
                    log::info!("[{}] Rescanning funding from scratch", hash.short());
                    entry.funding_txid = None;
                    entry.confirmed_reported = false;
                    entry.drop_reported = false;
                    self.registry.upsert_watch(&entry);
                }
            }
            ObserverCommand::Unwatch { hash } => {
                log::info!("[{}] Unwatching", hash.short());
                self.registry.remove_watch(&hash);
            }
            ObserverCommand::Shutdown => return false,
        }
        true
    }

    /// One scan pass over every watched swap. Public so tests can drive the
    /// observer without the run loop.
    pub fn scan_all(&mut self) {
        let tip = match self.source.tip_height() {
            Ok(tip) => tip,
            Err(e) => {
                log::warn!("Chain tip query failed: {e}");
                return;
            }
        };

        let backpressured = self.pending_events.load(Relaxed) > INBOX_SOFT_LIMIT;
        if backpressured {
            log::warn!("Coordinator inbox over soft limit, skipping secret re-scans");
        }

        for entry in self.registry.list_watches() {
            if entry.revealed.is_some() {
                continue;
            }
            match &entry.funding_txid {
                None => self.scan_funding(entry, tip),
                Some(_) => {
                    let entry = match self.check_funding(entry, tip) {
                        Some(entry) => entry,
                        None => continue,
                    };
                    if !backpressured {
                        self.scan_spends(entry);
                    }
                }
            }
        }
    }

    /// Looks for a transaction paying the watched address at least the
    /// registered amount.
    fn scan_funding(&mut self, mut entry: WatchEntry, tip: u64) {
        let txs = match self.source.address_txs(&entry.address) {
            Ok(txs) => txs,
            Err(e) => {
                log::warn!("[{}] Address query failed: {e}", entry.hash.short());
                return;
            }
        };

        for tx in txs {
            if self.registry.is_processed(&tx.txid) {
                continue;
            }
            let paid = tx.paid_to(&entry.address);
            if paid == 0 {
                // Spend or unrelated traffic; not a funding candidate.
                continue;
            }
            if paid < entry.min_sats {
                log::warn!(
                    "[{}] Insufficient funding {} < {} sats in {}, rejecting",
                    entry.hash.short(),
                    paid,
                    entry.min_sats,
                    tx.txid
                );
                self.registry.mark_processed(&tx.txid, now_secs());
                continue;
            }
            if !self.registry.mark_processed(&tx.txid, now_secs()) {
                continue;
            }
            if paid > entry.min_sats {
                log::warn!(
                    "[{}] Overpayment: {} sats against price {}",
                    entry.hash.short(),
                    paid,
                    entry.min_sats
                );
            }

            entry.funding_txid = Some(tx.txid.clone());
            self.registry.upsert_watch(&entry);
            self.emit(ObserverEvent::FundingSeen {
                hash: entry.hash,
                txid: tx.txid.clone(),
                sats: paid,
            });

            let confirmations = tx.confirmations(tip);
            if confirmations >= self.min_confirmations {
                entry.confirmed_reported = true;
                self.registry.upsert_watch(&entry);
                self.emit(ObserverEvent::FundingConfirmed {
                    hash: entry.hash,
                    txid: tx.txid,
                    confirmations,
                });
            }
            return;
        }
    }

    /// Re-checks a previously seen funding tx: confirmation threshold and
    /// reorg disappearance. Returns the entry when spend scanning should
    /// proceed.
    fn check_funding(&mut self, mut entry: WatchEntry, tip: u64) -> Option<WatchEntry> {
        let txid = entry.funding_txid.clone()?;
        match self.source.tx(&txid) {
            Ok(Some(tx)) => {
                if entry.drop_reported {
                    log::info!("[{}] Funding {} re-appeared on best chain", entry.hash.short(), txid);
                    entry.drop_reported = false;
                    self.registry.upsert_watch(&entry);
                }
                if !entry.confirmed_reported {
                    let confirmations = tx.confirmations(tip);
                    if confirmations >= self.min_confirmations {
                        entry.confirmed_reported = true;
                        self.registry.upsert_watch(&entry);
                        self.emit(ObserverEvent::FundingConfirmed {
                            hash: entry.hash,
                            txid,
                            confirmations,
                        });
                    }
                }
                Some(entry)
            }
            Ok(None) => {
                if !entry.drop_reported {
                    log::error!(
                        "[{}] Funding {} disappeared from best chain",
                        entry.hash.short(),
                        txid
                    );
                    entry.drop_reported = true;
                    self.registry.upsert_watch(&entry);
                    self.emit(ObserverEvent::FundingDropped {
                        hash: entry.hash,
                        txid,
                    });
                }
                None
            }
            Err(e) => {
                log::warn!("[{}] Funding query failed: {e}", entry.hash.short());
                None
            }
        }
    }

    /// Walks spends of the funding tx looking for the preimage in witness
    /// stacks.
    fn scan_spends(&mut self, mut entry: WatchEntry) {
        let funding_txid = match &entry.funding_txid {
            Some(txid) => txid.clone(),
            None => return,
        };
        let outspends = match self.source.outspends(&funding_txid) {
            Ok(outspends) => outspends,
            Err(e) => {
                log::warn!("[{}] Outspend query failed: {e}", entry.hash.short());
                return;
            }
        };

        for outspend in outspends {
            let spend_txid = match (outspend.spent, outspend.txid) {
                (true, Some(txid)) => txid,
                _ => continue,
            };
            if self.registry.is_processed(&spend_txid) {
                continue;
            }
            let tx = match self.source.tx(&spend_txid) {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[{}] Spend query failed: {e}", entry.hash.short());
                    continue;
                }
            };
            self.registry.mark_processed(&spend_txid, now_secs());

            for vin in &tx.vin {
                if vin.txid != funding_txid {
                    continue;
                }
                if let Some(preimage) = preimage_from_witness(&vin.witness, &entry.hash) {
                    log::info!(
                        "[{}] Secret revealed in {}",
                        entry.hash.short(),
                        spend_txid
                    );
                    entry.revealed = Some(RevealedSecret {
                        preimage,
                        reveal_txid: spend_txid.clone(),
                    });
                    self.registry.upsert_watch(&entry);
                    self.emit(ObserverEvent::SecretRevealed {
                        hash: entry.hash,
                        preimage,
                        reveal_txid: spend_txid,
                    });
                    return;
                }
            }
        }
    }

    fn emit(&self, event: ObserverEvent) {
        self.pending_events.fetch_add(1, Relaxed);
        if self.tx_events.send(event).is_err() {
            log::error!("Observer event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::api_backend::{ChainTx, ChainVin, ChainVout, OutSpend, TxStatus};
    use crate::chain::error::ObserverError;
    use std::{
        collections::HashMap,
        sync::{mpsc, Mutex},
    };
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockChain {
        by_address: Mutex<HashMap<String, Vec<ChainTx>>>,
        by_txid: Mutex<HashMap<String, ChainTx>>,
        outspends: Mutex<HashMap<String, Vec<OutSpend>>>,
        tip: Mutex<u64>,
    }

    impl MockChain {
        fn add_tx(&self, address: &str, tx: ChainTx) {
            self.by_txid
                .lock()
                .unwrap()
                .insert(tx.txid.clone(), tx.clone());
            self.by_address
                .lock()
                .unwrap()
                .entry(address.to_string())
                .or_default()
                .push(tx);
        }

        fn drop_tx(&self, txid: &str) {
            self.by_txid.lock().unwrap().remove(txid);
        }

        fn set_spent(&self, funding_txid: &str, spend: ChainTx) {
            self.outspends.lock().unwrap().insert(
                funding_txid.to_string(),
                vec![OutSpend {
                    spent: true,
                    txid: Some(spend.txid.clone()),
                }],
            );
            self.by_txid.lock().unwrap().insert(spend.txid.clone(), spend);
        }

        fn set_tip(&self, tip: u64) {
            *self.tip.lock().unwrap() = tip;
        }
    }

    impl ChainSource for &'static MockChain {
        fn address_txs(&self, address: &str) -> Result<Vec<ChainTx>, ObserverError> {
            Ok(self
                .by_address
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_default())
        }

        fn tx(&self, txid: &str) -> Result<Option<ChainTx>, ObserverError> {
            Ok(self.by_txid.lock().unwrap().get(txid).cloned())
        }

        fn outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ObserverError> {
            Ok(self
                .outspends
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .unwrap_or_default())
        }

        fn tip_height(&self) -> Result<u64, ObserverError> {
            Ok(*self.tip.lock().unwrap())
        }
    }

    struct Harness {
        observer: Observer,
        tx_commands: mpsc::Sender<ObserverCommand>,
        rx_events: mpsc::Receiver<ObserverEvent>,
        _dir: TempDir,
    }

    fn harness(chain: &'static MockChain, min_conf: u64) -> Harness {
        let dir = TempDir::new().unwrap();
        let registry = ObserverRegistry::load(dir.path().join("observer.cbor"));
        let (tx_commands, rx_commands) = mpsc::channel();
        let (tx_events, rx_events) = mpsc::channel();
        let observer = Observer::new(
            Box::new(chain),
            None,
            registry,
            rx_commands,
            tx_events,
            Arc::new(AtomicUsize::new(0)),
            min_conf,
            Duration::from_secs(30),
        );
        Harness {
            observer,
            tx_commands,
            rx_events,
            _dir: dir,
        }
    }

    fn leak(chain: MockChain) -> &'static MockChain {
        Box::leak(Box::new(chain))
    }

    fn funding_tx(txid: &str, address: &str, sats: u64, height: Option<u64>) -> ChainTx {
        ChainTx {
            txid: txid.to_string(),
            vin: vec![],
            vout: vec![ChainVout {
                scriptpubkey_address: Some(address.to_string()),
                value: sats,
            }],
            status: TxStatus {
                confirmed: height.is_some(),
                block_height: height,
                block_time: height.map(|h| 1_700_000_000 + h),
            },
        }
    }

    fn watch(h: &mut Harness, hash: HashLock, address: &str, min_sats: u64) {
        h.tx_commands
            .send(ObserverCommand::WatchFunding {
                hash,
                address: address.to_string(),
                min_sats,
            })
            .unwrap();
        let cmd = h.observer.rx_commands.try_recv().unwrap();
        h.observer.handle_command(cmd);
    }

    fn swap_hash() -> (Preimage, HashLock) {
        let preimage = Preimage([0xaa; 32]);
        (preimage, HashLock::commit(&preimage))
    }

    #[test]
    fn test_funding_seen_once_despite_rescans() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("f1", "tb1qseller", 50_000_000, Some(100)));

        let mut h = harness(chain, 1);
        let (_, hash) = swap_hash();
        watch(&mut h, hash, "tb1qseller", 50_000_000);

        for _ in 0..3 {
            h.observer.scan_all();
        }

        let events: Vec<_> = h.rx_events.try_iter().collect();
        let seen = events
            .iter()
            .filter(|e| matches!(e, ObserverEvent::FundingSeen { .. }))
            .count();
        let confirmed = events
            .iter()
            .filter(|e| matches!(e, ObserverEvent::FundingConfirmed { .. }))
            .count();
        assert_eq!(seen, 1);
        assert_eq!(confirmed, 1);
    }

    #[test]
    fn test_underpayment_rejected_exact_and_over_accepted() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("low", "tb1qseller", 49_999_999, Some(100)));

        let mut h = harness(chain, 1);
        let (_, hash) = swap_hash();
        watch(&mut h, hash, "tb1qseller", 50_000_000);
        h.observer.scan_all();
        assert!(h.rx_events.try_iter().next().is_none());

        // Exact price is accepted.
        chain.add_tx("tb1qseller", funding_tx("exact", "tb1qseller", 50_000_000, Some(101)));
        h.observer.scan_all();
        let events: Vec<_> = h.rx_events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, ObserverEvent::FundingSeen { txid, sats: 50_000_000, .. } if txid == "exact")));
    }

    #[test]
    fn test_confirmation_threshold_crossed_later() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("f1", "tb1qseller", 1_000_000, Some(100)));

        let mut h = harness(chain, 3);
        let (_, hash) = swap_hash();
        watch(&mut h, hash, "tb1qseller", 1_000_000);

        h.observer.scan_all();
        let events: Vec<_> = h.rx_events.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ObserverEvent::FundingSeen { .. }));

        // Two more blocks: 3 confirmations reached.
        chain.set_tip(102);
        h.observer.scan_all();
        let events: Vec<_> = h.rx_events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            ObserverEvent::FundingConfirmed { confirmations: 3, .. }
        )));
    }

    #[test]
    fn test_secret_extracted_from_spend_witness() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("f1", "tb1qseller", 1_000_000, Some(100)));

        let (preimage, hash) = swap_hash();
        let mut h = harness(chain, 1);
        watch(&mut h, hash, "tb1qseller", 1_000_000);
        h.observer.scan_all();
        h.rx_events.try_iter().count();

        let spend = ChainTx {
            txid: "spend1".to_string(),
            vin: vec![ChainVin {
                txid: "f1".to_string(),
                vout: 0,
                witness: vec![
                    "30".repeat(71),
                    "02".repeat(33),
                    preimage.to_string(),
                    "01".to_string(),
                    "51".repeat(80),
                ],
            }],
            vout: vec![],
            status: TxStatus::default(),
        };
        chain.set_spent("f1", spend);

        h.observer.scan_all();
        let events: Vec<_> = h.rx_events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            ObserverEvent::SecretRevealed { preimage: p, reveal_txid, .. }
                if *p == preimage && reveal_txid == "spend1"
        )));

        // Secret found: further scans are quiet.
        h.observer.scan_all();
        assert!(h.rx_events.try_iter().next().is_none());
    }

    #[test]
    fn test_reorg_reports_drop_once_and_rescan_recovers() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("f1", "tb1qseller", 1_000_000, Some(100)));

        let (_, hash) = swap_hash();
        let mut h = harness(chain, 1);
        watch(&mut h, hash, "tb1qseller", 1_000_000);
        h.observer.scan_all();
        h.rx_events.try_iter().count();

        chain.drop_tx("f1");
        h.observer.scan_all();
        h.observer.scan_all();
        let drops = h
            .rx_events
            .try_iter()
            .filter(|e| matches!(e, ObserverEvent::FundingDropped { .. }))
            .count();
        assert_eq!(drops, 1);

        // Coordinator downgraded the swap and asks for a rescan; a new
        // funding tx is then detected normally.
        h.tx_commands
            .send(ObserverCommand::RescanFunding { hash })
            .unwrap();
        let cmd = h.observer.rx_commands.try_recv().unwrap();
        h.observer.handle_command(cmd);

        chain.add_tx("tb1qseller", funding_tx("f2", "tb1qseller", 1_000_000, Some(101)));
        chain.set_tip(101);
        h.observer.scan_all();
        let events: Vec<_> = h.rx_events.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, ObserverEvent::FundingSeen { txid, .. } if txid == "f2")));
    }

    #[test]
    fn test_unwatch_stops_reporting() {
        let chain = leak(MockChain::default());
        chain.set_tip(100);
        chain.add_tx("tb1qseller", funding_tx("f1", "tb1qseller", 1_000_000, Some(100)));

        let (_, hash) = swap_hash();
        let mut h = harness(chain, 1);
        watch(&mut h, hash, "tb1qseller", 1_000_000);
        h.tx_commands.send(ObserverCommand::Unwatch { hash }).unwrap();
        let cmd = h.observer.rx_commands.try_recv().unwrap();
        h.observer.handle_command(cmd);

        h.observer.scan_all();
        assert!(h.rx_events.try_iter().next().is_none());
    }
}
