//! The swap coordinator: a per-swap state machine binding the Bitcoin
//! observer and the asset-ledger actuator.
//!
//! The coordinator is a single actor thread with an inbox. Observer events,
//! admin requests, completed ledger submissions and timer firings all arrive
//! as messages; every state transition for every swap happens on this thread,
//! so no cross-swap locks exist. Ledger submissions run on short-lived worker
//! threads and post their outcome back to the inbox, so no handler ever
//! blocks on network I/O.

pub mod config;
pub mod error;
pub mod rpc;
pub mod swap;

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    actuator::{
        error::ActuatorError, AssetActuator, ClaimOutcome, LedgerClient, OpenOutcome,
        RefundOutcome,
    },
    chain::{
        api_backend::ChainSource,
        observer::ObserverEvent,
        registry::ObserverRegistry,
        service::{start_observer_service, ObserverService},
    },
    protocol::{
        error::ProtocolError, handoff::HandoffPayload, hashlock::HashLock, hashlock::Preimage,
        timelock::TimelockPair,
    },
    utill::{now_secs, HEART_BEAT_INTERVAL},
};

use config::CoordinatorConfig;
use error::CoordinatorError;
use swap::{PendingSwap, SwapBook, SwapRequest, SwapStatus};

/// Backoff before retry attempt `n` (1-based): 1 s base, doubling, 30 s cap.
pub(crate) fn backoff_secs(attempt: u32) -> u64 {
    (1u64 << attempt.saturating_sub(1).min(5)).min(30)
}

/// Requests posted to the coordinator inbox by the admin RPC.
pub enum CoordinatorRequest {
    /// Register a new swap; replies with the buyer handoff payload.
    Register {
        /// Registration parameters.
        request: SwapRequest,
        /// Reply channel.
        resp: Sender<Result<HandoffPayload, CoordinatorError>>,
    },
    /// Operator-forced claim, bypassing automatic scheduling.
    ForceClaim {
        /// Token under escrow.
        token_id: u64,
        /// The secret to claim with.
        preimage: Preimage,
        /// Reply channel; `Ok` means the claim was dispatched.
        resp: Sender<Result<(), CoordinatorError>>,
    },
    /// Operator-forced refund, bypassing automatic scheduling.
    ForceRefund {
        /// Token under escrow.
        token_id: u64,
        /// Reply channel; `Ok` means the refund was dispatched.
        resp: Sender<Result<(), CoordinatorError>>,
    },
    /// Stop the coordinator loop.
    Shutdown,
}

/// Completion messages posted back by ledger-submission workers.
enum TaskDone {
    Opened {
        hash: HashLock,
        result: Result<OpenOutcome, ActuatorError>,
    },
    Claimed {
        hash: HashLock,
        result: Result<ClaimOutcome, ActuatorError>,
    },
    DeadlineSettled {
        hash: HashLock,
        result: Result<DeadlineOutcome, ActuatorError>,
    },
    Refunded {
        hash: HashLock,
        result: Result<RefundOutcome, ActuatorError>,
    },
}

enum DeadlineOutcome {
    Refunded(RefundOutcome),
    NothingToRefund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TimerKind {
    Deadline,
    RetryOpen,
    RetryClaim,
}

/// Aggregate counters for the `stats` admin call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SwapStats {
    /// Seconds since the coordinator started.
    pub uptime_secs: u64,
    /// All records in the book, active and recently terminal.
    pub total_swaps: usize,
    /// Swaps waiting for BTC funding.
    pub waiting_btc: usize,
    /// Swaps with funding seen.
    pub btc_locked: usize,
    /// Swaps with the asset escrow open.
    pub asset_locked: usize,
    /// Settled swaps.
    pub claimed: usize,
    /// Refunded swaps.
    pub refunded: usize,
    /// Expired swaps.
    pub expired: usize,
    /// Size of the observer's processed-txid cache.
    pub processed_txids: usize,
    /// Ledger logs dropped as unrecognized.
    pub dropped_logs: u64,
}

/// Cloneable handle serving the admin RPC: reads go straight to the shared
/// swap book, mutations are posted to the coordinator inbox.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: Sender<CoordinatorRequest>,
    book: Arc<Mutex<SwapBook>>,
    registry: ObserverRegistry,
    actuator: AssetActuator,
    shutdown: Arc<AtomicBool>,
    started_at: u64,
}

impl CoordinatorHandle {
    /// Registers a swap and returns the buyer handoff payload.
    pub fn register_swap(
        &self,
        request: SwapRequest,
    ) -> Result<HandoffPayload, CoordinatorError> {
        let (resp, rx) = mpsc::channel();
        self.tx
            .send(CoordinatorRequest::Register { request, resp })
            .map_err(|_| CoordinatorError::ActorGone)?;
        rx.recv().map_err(|_| CoordinatorError::ActorGone)?
    }

    /// Returns a swap by hash.
    pub fn get_swap(&self, hash: &HashLock) -> Result<Option<PendingSwap>, CoordinatorError> {
        Ok(self.book.lock()?.get(hash).cloned())
    }

    /// Returns all swaps in the book.
    pub fn list_swaps(&self) -> Result<Vec<PendingSwap>, CoordinatorError> {
        Ok(self.book.lock()?.all())
    }

    /// Dispatches an operator-forced claim.
    pub fn force_claim(
        &self,
        token_id: u64,
        preimage: Preimage,
    ) -> Result<(), CoordinatorError> {
        let (resp, rx) = mpsc::channel();
        self.tx
            .send(CoordinatorRequest::ForceClaim {
                token_id,
                preimage,
                resp,
            })
            .map_err(|_| CoordinatorError::ActorGone)?;
        rx.recv().map_err(|_| CoordinatorError::ActorGone)?
    }

    /// Dispatches an operator-forced refund.
    pub fn force_refund(&self, token_id: u64) -> Result<(), CoordinatorError> {
        let (resp, rx) = mpsc::channel();
        self.tx
            .send(CoordinatorRequest::ForceRefund { token_id, resp })
            .map_err(|_| CoordinatorError::ActorGone)?;
        rx.recv().map_err(|_| CoordinatorError::ActorGone)?
    }

    /// Aggregate counters.
    pub fn stats(&self) -> Result<SwapStats, CoordinatorError> {
        let book = self.book.lock()?;
        let counts = book.count_by_status();
        let count = |status: SwapStatus| counts.get(&status).copied().unwrap_or(0);
        Ok(SwapStats {
            uptime_secs: now_secs().saturating_sub(self.started_at),
            total_swaps: book.len(),
            waiting_btc: count(SwapStatus::WaitingBtc),
            btc_locked: count(SwapStatus::BtcLocked),
            asset_locked: count(SwapStatus::AssetLocked),
            claimed: count(SwapStatus::Claimed),
            refunded: count(SwapStatus::Refunded),
            expired: count(SwapStatus::Expired),
            processed_txids: self.registry.processed_count(),
            dropped_logs: self.actuator.dropped_logs(),
        })
    }

    /// Signals the coordinator to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Relaxed);
        let _ = self.tx.send(CoordinatorRequest::Shutdown);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Relaxed)
    }
}

/// The coordinator actor. Build with [`Coordinator::start`].
pub struct Coordinator {
    config: CoordinatorConfig,
    book: Arc<Mutex<SwapBook>>,
    observer: ObserverService,
    registry: ObserverRegistry,
    actuator: AssetActuator,
    rx_requests: Receiver<CoordinatorRequest>,
    tx_done: Sender<TaskDone>,
    rx_done: Receiver<TaskDone>,
    timers: BinaryHeap<Reverse<(u64, TimerKind, HashLock)>>,
    in_flight: HashSet<HashLock>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    observer_handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Wires up the observer, actuator and swap book, spawns the observer
    /// and coordinator threads, and returns the admin handle.
    pub fn start(
        config: CoordinatorConfig,
        data_dir: &Path,
        client: Arc<dyn LedgerClient>,
        source: Box<dyn ChainSource>,
    ) -> Result<(CoordinatorHandle, JoinHandle<()>), CoordinatorError> {
        let book = Arc::new(Mutex::new(SwapBook::load_or_create(data_dir)?));
        let registry = ObserverRegistry::load(data_dir.join("observer_registry.cbor"));

        let ws_url = if config.btc_ws_url.is_empty() {
            None
        } else {
            Some(config.btc_ws_url.as_str())
        };
        let (observer, observer_handle) = start_observer_service(
            source,
            ws_url,
            registry.clone(),
            config.min_confirmations,
            Duration::from_millis(config.poll_interval_ms),
        );

        let actuator = AssetActuator::new(client, config.unit_ceiling);
        let (tx_requests, rx_requests) = mpsc::channel();
        let (tx_done, rx_done) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let started_at = now_secs();

        let handle = CoordinatorHandle {
            tx: tx_requests,
            book: book.clone(),
            registry: registry.clone(),
            actuator: actuator.clone(),
            shutdown: shutdown.clone(),
            started_at,
        };

        let mut coordinator = Coordinator {
            config,
            book,
            observer,
            registry,
            actuator,
            rx_requests,
            tx_done,
            rx_done,
            timers: BinaryHeap::new(),
            in_flight: HashSet::new(),
            shutdown,
            workers: Mutex::new(Vec::new()),
            observer_handle: Some(observer_handle),
        };

        let join = thread::Builder::new()
            .name("Coordinator thread".to_string())
            .spawn(move || coordinator.run())
            .map_err(CoordinatorError::IO)?;

        Ok((handle, join))
    }

    /// Main loop. Runs until shutdown is requested, then drains and joins.
    fn run(&mut self) {
        log::info!("Coordinator initiated");
        self.recover();

        let mut last_housekeeping = now_secs();
        loop {
            if self.shutdown.load(Relaxed) {
                break;
            }

            loop {
                match self.rx_requests.try_recv() {
                    Ok(CoordinatorRequest::Shutdown) => {
                        self.shutdown.store(true, Relaxed);
                        break;
                    }
                    Ok(request) => self.handle_request(request),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown.store(true, Relaxed);
                        break;
                    }
                }
            }

            while let Some(event) = self.observer.poll_event() {
                self.handle_observation(event);
            }

            while let Ok(done) = self.rx_done.try_recv() {
                self.handle_task_done(done);
            }

            self.fire_due_timers();

            let now = now_secs();
            if now.saturating_sub(last_housekeeping) >= 60 {
                self.housekeeping(now);
                last_housekeeping = now;
            }

            thread::sleep(HEART_BEAT_INTERVAL);
        }

        self.finish();
    }

    /// Re-arms watches, timers and deferred actions for swaps that survived
    /// a restart.
    fn recover(&mut self) {
        let active = match self.book.lock() {
            Ok(book) => book.active(),
            Err(_) => return,
        };
        if active.is_empty() {
            return;
        }
        log::info!("Recovering {} active swaps", active.len());
        let now = now_secs();

        for swap in active {
            self.observer.watch_funding(
                swap.hash,
                swap.seller_btc_addr.clone(),
                swap.price_sats,
            );
            self.schedule(
                TimerKind::Deadline,
                swap.hash,
                swap.deadline
                    .saturating_sub(self.config.head_start_secs)
                    .max(now),
            );

            // Replay observations the observer already acknowledged before
            // the restart; its dedup cache will not re-deliver them.
            if let Some(entry) = self.registry.get_watch(&swap.hash) {
                if let Some(revealed) = entry.revealed {
                    self.handle_observation(ObserverEvent::SecretRevealed {
                        hash: swap.hash,
                        preimage: revealed.preimage,
                        reveal_txid: revealed.reveal_txid,
                    });
                } else if entry.confirmed_reported && swap.status == SwapStatus::BtcLocked {
                    self.try_open(swap.hash);
                }
            }
        }
    }

    fn handle_request(&mut self, request: CoordinatorRequest) {
        match request {
            CoordinatorRequest::Register { request, resp } => {
                let _ = resp.send(self.handle_register(request));
            }
            CoordinatorRequest::ForceClaim {
                token_id,
                preimage,
                resp,
            } => {
                let _ = resp.send(self.handle_force_claim(token_id, preimage));
            }
            CoordinatorRequest::ForceRefund { token_id, resp } => {
                let _ = resp.send(self.handle_force_refund(token_id));
            }
            CoordinatorRequest::Shutdown => {}
        }
    }

    fn handle_register(
        &mut self,
        request: SwapRequest,
    ) -> Result<HandoffPayload, CoordinatorError> {
        let now = now_secs();
        if request.price_sats == 0 {
            return Err(ProtocolError::General("price must be positive").into());
        }
        if request.seller_btc_addr.is_empty()
            || request.seller_asset_addr.is_empty()
            || request.buyer_asset_addr.is_empty()
        {
            return Err(ProtocolError::General("missing address field").into());
        }
        // Validates the deadline and the asymmetric-timelock pair the buyer
        // must fund against.
        let timelocks =
            TimelockPair::calculate(request.deadline, self.config.timeout_buffer_hours, now)?;

        {
            let book = self.book.lock()?;
            if book.get(&request.hash).is_some() {
                return Err(CoordinatorError::DuplicateHash);
            }
        }

        let swap = PendingSwap::from_request(&request);
        self.book.lock()?.save(&swap)?;
        self.observer
            .watch_funding(swap.hash, swap.seller_btc_addr.clone(), swap.price_sats);
        self.schedule(
            TimerKind::Deadline,
            swap.hash,
            swap.deadline
                .saturating_sub(self.config.head_start_secs)
                .max(now),
        );

        log::info!(
            "[{}] Registered swap: {} (T_asset={}, T_btc={})",
            swap.hash.short(),
            swap,
            timelocks.t_asset,
            timelocks.t_btc
        );

        Ok(HandoffPayload::new(
            request.hash,
            request.price_sats,
            request.seller_btc_addr,
            request.deadline,
            request.token_id,
            request.asset_title,
            self.config.network_btc.clone(),
            self.config.network_asset.clone(),
        ))
    }

    fn handle_observation(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::FundingSeen { hash, txid, sats } => {
                self.update_swap(hash, |swap| {
                    if swap.status != SwapStatus::WaitingBtc {
                        return false;
                    }
                    log::info!(
                        "[{}] BTC funding seen: {} ({} sats)",
                        hash.short(),
                        txid,
                        sats
                    );
                    swap.status = SwapStatus::BtcLocked;
                    swap.btc_txid = Some(txid.clone());
                    swap.funded_sats = Some(sats);
                    true
                });
            }
            ObserverEvent::FundingConfirmed {
                hash,
                confirmations,
                ..
            } => {
                let should_open = self
                    .with_swap(&hash, |swap| swap.status == SwapStatus::BtcLocked)
                    .unwrap_or(false);
                if should_open {
                    log::info!(
                        "[{}] Funding confirmed ({} confs), opening asset escrow",
                        hash.short(),
                        confirmations
                    );
                    self.try_open(hash);
                }
            }
            ObserverEvent::FundingDropped { hash, txid } => {
                self.handle_funding_dropped(hash, txid);
            }
            ObserverEvent::SecretRevealed {
                hash,
                preimage,
                reveal_txid,
            } => {
                self.handle_secret_revealed(hash, preimage, reveal_txid);
            }
        }
    }

    fn handle_funding_dropped(&mut self, hash: HashLock, txid: String) {
        let status = self.with_swap(&hash, |swap| swap.status);
        match status {
            Some(SwapStatus::BtcLocked) => {
                log::warn!(
                    "[{}] Funding {} reorged away before asset lock, downgrading",
                    hash.short(),
                    txid
                );
                self.update_swap(hash, |swap| {
                    swap.status = SwapStatus::WaitingBtc;
                    swap.btc_txid = None;
                    swap.funded_sats = None;
                    true
                });
                self.observer.rescan_funding(hash);
            }
            Some(SwapStatus::AssetLocked) => {
                // The asset leg is already committed. Refunding early would
                // hand the buyer a free option, so hold until the deadline.
                log::error!(
                    "[{}] OPERATOR ALERT: funding {} disappeared after asset lock; \
                     holding escrow until deadline",
                    hash.short(),
                    txid
                );
                self.update_swap(hash, |swap| {
                    swap.last_error =
                        Some("btc funding reorged away after asset lock".to_string());
                    true
                });
            }
            _ => {}
        }
    }

    fn handle_secret_revealed(&mut self, hash: HashLock, preimage: Preimage, reveal_txid: String) {
        let status = match self.with_swap(&hash, |swap| swap.status) {
            Some(status) => status,
            None => return,
        };
        match status {
            SwapStatus::WaitingBtc => {
                // Cannot act on a secret before the funding itself is
                // acknowledged; the observer will not re-deliver, but the
                // swap cannot have an open escrow yet either.
                log::warn!(
                    "[{}] Rejecting secret observed while waiting for BTC",
                    hash.short()
                );
            }
            SwapStatus::BtcLocked => {
                log::info!(
                    "[{}] Secret observed before escrow open, deferring claim",
                    hash.short()
                );
                self.update_swap(hash, |swap| {
                    swap.secret = Some(preimage);
                    swap.reveal_txid = Some(reveal_txid.clone());
                    true
                });
            }
            SwapStatus::AssetLocked => {
                self.update_swap(hash, |swap| {
                    swap.secret = Some(preimage);
                    swap.reveal_txid = Some(reveal_txid.clone());
                    true
                });
                if self.config.auto_claim {
                    self.try_claim(hash, preimage);
                } else {
                    log::info!(
                        "[{}] auto_claim disabled; waiting for operator force-claim",
                        hash.short()
                    );
                }
            }
            _ => {}
        }
    }

    /// Dispatches an escrow open unless the adjusted expiry has already
    /// passed.
    fn try_open(&mut self, hash: HashLock) {
        if self.in_flight.contains(&hash) {
            return;
        }
        let swap = match self.with_swap(&hash, |swap| swap.clone()) {
            Some(swap) => swap,
            None => return,
        };
        let now = now_secs();
        let expiry = swap.deadline.saturating_sub(self.config.head_start_secs);
        if expiry <= now {
            log::warn!(
                "[{}] Adjusted expiry {} too soon, skipping escrow open; swap will expire",
                hash.short(),
                expiry
            );
            return;
        }

        self.in_flight.insert(hash);
        let actuator = self.actuator.clone();
        let tx_done = self.tx_done.clone();
        self.spawn_worker(format!("open-{}", hash.short()), move || {
            let result = actuator.open_escrow(
                swap.token_id,
                &swap.seller_asset_addr,
                &swap.buyer_asset_addr,
                hash,
                expiry,
                swap.price_sats,
            );
            let _ = tx_done.send(TaskDone::Opened { hash, result });
        });
    }

    fn try_claim(&mut self, hash: HashLock, preimage: Preimage) {
        if self.in_flight.contains(&hash) {
            return;
        }
        let token_id = match self.with_swap(&hash, |swap| swap.token_id) {
            Some(token_id) => token_id,
            None => return,
        };
        self.in_flight.insert(hash);
        let actuator = self.actuator.clone();
        let tx_done = self.tx_done.clone();
        self.spawn_worker(format!("claim-{}", hash.short()), move || {
            let result = actuator.claim(token_id, preimage);
            let _ = tx_done.send(TaskDone::Claimed { hash, result });
        });
    }

    fn handle_task_done(&mut self, done: TaskDone) {
        match done {
            TaskDone::Opened { hash, result } => self.handle_opened(hash, result),
            TaskDone::Claimed { hash, result } => self.handle_claimed(hash, result),
            TaskDone::DeadlineSettled { hash, result } => {
                self.handle_deadline_settled(hash, result)
            }
            TaskDone::Refunded { hash, result } => self.handle_refunded(hash, result),
        }
    }

    fn handle_opened(&mut self, hash: HashLock, result: Result<OpenOutcome, ActuatorError>) {
        self.in_flight.remove(&hash);
        match result {
            Ok(outcome) => {
                log::info!(
                    "[{}] Asset escrow open in {} (expiry {})",
                    hash.short(),
                    outcome.txid,
                    outcome.expiry
                );
                self.update_swap(hash, |swap| {
                    if swap.status != SwapStatus::BtcLocked {
                        return false;
                    }
                    swap.status = SwapStatus::AssetLocked;
                    swap.asset_open_txid = Some(outcome.txid.clone());
                    swap.retry_attempt = 0;
                    swap.last_error = None;
                    true
                });
                // A secret that arrived before the open can be acted on now.
                let deferred = self
                    .with_swap(&hash, |swap| swap.secret)
                    .flatten();
                if let Some(preimage) = deferred {
                    if self.config.auto_claim {
                        self.try_claim(hash, preimage);
                    }
                }
            }
            Err(e) => self.handle_submit_failure(hash, TimerKind::RetryOpen, "escrow open", e),
        }
    }

    fn handle_claimed(&mut self, hash: HashLock, result: Result<ClaimOutcome, ActuatorError>) {
        self.in_flight.remove(&hash);
        match result {
            Ok(outcome) => {
                log::info!(
                    "[{}] Swap claimed: token settled to {} in {}",
                    hash.short(),
                    outcome.buyer,
                    outcome.txid
                );
                self.update_swap(hash, |swap| {
                    if swap.status.is_terminal() {
                        return false;
                    }
                    swap.status = SwapStatus::Claimed;
                    swap.asset_close_txid = Some(outcome.txid.clone());
                    swap.retry_attempt = 0;
                    swap.last_error = None;
                    true
                });
                self.observer.unwatch(hash);
            }
            Err(e) => self.handle_submit_failure(hash, TimerKind::RetryClaim, "claim", e),
        }
    }

    /// Shared failure policy: external failures back off and retry, final
    /// failures park the swap for the deadline path or the operator.
    fn handle_submit_failure(
        &mut self,
        hash: HashLock,
        retry_kind: TimerKind,
        what: &str,
        error: ActuatorError,
    ) {
        let attempt = self
            .with_swap(&hash, |swap| swap.retry_attempt)
            .unwrap_or(0)
            + 1;

        if !error.is_retryable() {
            log::error!("[{}] {} rejected: {}", hash.short(), what, error);
            self.update_swap(hash, |swap| {
                swap.last_error = Some(format!("{what} rejected: {error}"));
                true
            });
            return;
        }

        let max_retries = self.config.max_retries;
        if attempt <= max_retries {
            let delay = backoff_secs(attempt);
            log::warn!(
                "[{}] {} attempt {}/{} failed ({}), retrying in {}s",
                hash.short(),
                what,
                attempt,
                max_retries,
                error,
                delay
            );
            self.update_swap(hash, |swap| {
                swap.retry_attempt = attempt;
                swap.last_error = Some(error.to_string());
                true
            });
            self.schedule(retry_kind, hash, now_secs() + delay);
        } else {
            log::error!(
                "[{}] PersistentExternalFailure: {} failed {} times: {}",
                hash.short(),
                what,
                max_retries,
                error
            );
            self.update_swap(hash, |swap| {
                swap.last_error = Some(format!("PersistentExternalFailure: {error}"));
                true
            });
            if retry_kind == TimerKind::RetryOpen {
                // The asset may still be openable in a later block; fall
                // back to the poll cadence.
                self.schedule(
                    retry_kind,
                    hash,
                    now_secs() + self.config.poll_interval_ms / 1000,
                );
            }
        }
    }

    fn fire_due_timers(&mut self) {
        let now = now_secs();
        while let Some(&Reverse((at, kind, hash))) = self.timers.peek() {
            if at > now {
                break;
            }
            self.timers.pop();
            self.handle_timer(kind, hash);
        }
    }

    fn handle_timer(&mut self, kind: TimerKind, hash: HashLock) {
        let status = match self.with_swap(&hash, |swap| swap.status) {
            Some(status) => status,
            None => return,
        };
        if status.is_terminal() {
            return;
        }
        match kind {
            TimerKind::Deadline => self.handle_deadline(hash, status),
            TimerKind::RetryOpen => {
                if status == SwapStatus::BtcLocked {
                    self.try_open(hash);
                }
            }
            TimerKind::RetryClaim => {
                if status == SwapStatus::AssetLocked {
                    let secret = self.with_swap(&hash, |swap| swap.secret).flatten();
                    if let Some(preimage) = secret {
                        self.try_claim(hash, preimage);
                    }
                }
            }
        }
    }

    fn handle_deadline(&mut self, hash: HashLock, status: SwapStatus) {
        match status {
            SwapStatus::WaitingBtc => {
                log::info!(
                    "[{}] Deadline reached without funding, swap expired",
                    hash.short()
                );
                self.update_swap(hash, |swap| {
                    swap.status = SwapStatus::Expired;
                    true
                });
                self.observer.unwatch(hash);
            }
            SwapStatus::BtcLocked | SwapStatus::AssetLocked => {
                if self.in_flight.contains(&hash) {
                    // An open or claim is racing the deadline; check again
                    // shortly after it resolves.
                    self.schedule(TimerKind::Deadline, hash, now_secs() + 1);
                    return;
                }
                let token_id = match self.with_swap(&hash, |swap| swap.token_id) {
                    Some(token_id) => token_id,
                    None => return,
                };
                self.in_flight.insert(hash);
                let actuator = self.actuator.clone();
                let tx_done = self.tx_done.clone();
                self.spawn_worker(format!("deadline-{}", hash.short()), move || {
                    let result = match actuator.is_in_escrow(token_id) {
                        Ok(true) => actuator.refund(token_id).map(DeadlineOutcome::Refunded),
                        Ok(false) => Ok(DeadlineOutcome::NothingToRefund),
                        Err(e) => Err(e),
                    };
                    let _ = tx_done.send(TaskDone::DeadlineSettled { hash, result });
                });
            }
            _ => {}
        }
    }

    fn handle_deadline_settled(
        &mut self,
        hash: HashLock,
        result: Result<DeadlineOutcome, ActuatorError>,
    ) {
        self.in_flight.remove(&hash);
        match result {
            Ok(DeadlineOutcome::Refunded(outcome)) => {
                log::info!(
                    "[{}] Deadline refund: token back with {} in {}",
                    hash.short(),
                    outcome.seller,
                    outcome.txid
                );
                self.update_swap(hash, |swap| {
                    if swap.status.is_terminal() {
                        return false;
                    }
                    swap.status = SwapStatus::Refunded;
                    swap.asset_close_txid = Some(outcome.txid.clone());
                    true
                });
                self.observer.unwatch(hash);
            }
            Ok(DeadlineOutcome::NothingToRefund) => {
                // The buyer claimed in a race with the deadline; the settle
                // event will or did close the swap. Nothing to refund is not
                // an error.
                self.update_swap(hash, |swap| {
                    if swap.status.is_terminal() {
                        return false;
                    }
                    log::info!(
                        "[{}] Deadline reached, escrow already gone, marking expired",
                        hash.short()
                    );
                    swap.status = SwapStatus::Expired;
                    true
                });
                self.observer.unwatch(hash);
            }
            Err(e) => {
                let attempt = self
                    .with_swap(&hash, |swap| swap.retry_attempt)
                    .unwrap_or(0)
                    + 1;
                let delay = if attempt <= self.config.max_retries {
                    backoff_secs(attempt)
                } else {
                    self.config.poll_interval_ms / 1000
                };
                log::error!(
                    "[{}] Deadline settlement failed ({}), retrying in {}s",
                    hash.short(),
                    e,
                    delay
                );
                self.update_swap(hash, |swap| {
                    swap.retry_attempt = attempt;
                    swap.last_error = Some(e.to_string());
                    true
                });
                self.schedule(TimerKind::Deadline, hash, now_secs() + delay);
            }
        }
    }

    fn handle_force_claim(
        &mut self,
        token_id: u64,
        preimage: Preimage,
    ) -> Result<(), CoordinatorError> {
        let hash = {
            let book = self.book.lock()?;
            book.find_by_token(token_id)
                .map(|swap| swap.hash)
                .ok_or(CoordinatorError::UnknownSwap)?
        };
        log::info!("[{}] Operator force-claim for token {}", hash.short(), token_id);
        self.update_swap(hash, |swap| {
            swap.secret = Some(preimage);
            true
        });
        self.try_claim(hash, preimage);
        Ok(())
    }

    fn handle_force_refund(&mut self, token_id: u64) -> Result<(), CoordinatorError> {
        let hash = {
            let book = self.book.lock()?;
            book.find_by_token(token_id)
                .map(|swap| swap.hash)
                .ok_or(CoordinatorError::UnknownSwap)?
        };
        if self.in_flight.contains(&hash) {
            return Err(CoordinatorError::WrongState("submission in flight"));
        }
        log::info!(
            "[{}] Operator force-refund for token {}",
            hash.short(),
            token_id
        );
        self.in_flight.insert(hash);
        let actuator = self.actuator.clone();
        let tx_done = self.tx_done.clone();
        self.spawn_worker(format!("refund-{}", hash.short()), move || {
            let result = actuator.refund(token_id);
            let _ = tx_done.send(TaskDone::Refunded { hash, result });
        });
        Ok(())
    }

    fn handle_refunded(&mut self, hash: HashLock, result: Result<RefundOutcome, ActuatorError>) {
        self.in_flight.remove(&hash);
        match result {
            Ok(outcome) => {
                log::info!(
                    "[{}] Forced refund settled to {} in {}",
                    hash.short(),
                    outcome.seller,
                    outcome.txid
                );
                self.update_swap(hash, |swap| {
                    if swap.status.is_terminal() {
                        return false;
                    }
                    swap.status = SwapStatus::Refunded;
                    swap.asset_close_txid = Some(outcome.txid.clone());
                    true
                });
                self.observer.unwatch(hash);
            }
            Err(e) => {
                log::error!("[{}] Forced refund failed: {}", hash.short(), e);
                self.update_swap(hash, |swap| {
                    swap.last_error = Some(format!("force refund: {e}"));
                    true
                });
            }
        }
    }

    fn housekeeping(&mut self, now: u64) {
        if let Ok(mut book) = self.book.lock() {
            match book.retire_old(now) {
                Ok(retired) => {
                    for hash in retired {
                        log::info!("[{}] Retired terminal swap", hash.short());
                        self.observer.unwatch(hash);
                    }
                }
                Err(e) => log::error!("Swap retirement failed: {e}"),
            }
        }
    }

    fn schedule(&mut self, kind: TimerKind, hash: HashLock, at: u64) {
        self.timers.push(Reverse((at, kind, hash)));
    }

    /// Reads a value out of one swap without holding the book lock past the
    /// closure.
    fn with_swap<T>(&self, hash: &HashLock, f: impl FnOnce(&PendingSwap) -> T) -> Option<T> {
        let book = self.book.lock().ok()?;
        book.get(hash).map(f)
    }

    /// Applies a mutation to one swap; the closure returns whether anything
    /// changed. Persists and stamps `updated_at` on change.
    fn update_swap(&self, hash: HashLock, f: impl FnOnce(&mut PendingSwap) -> bool) {
        let mut book = match self.book.lock() {
            Ok(book) => book,
            Err(_) => return,
        };
        let mut swap = match book.get(&hash) {
            Some(swap) => swap.clone(),
            None => return,
        };
        if f(&mut swap) {
            swap.updated_at = now_secs();
            if let Err(e) = book.save(&swap) {
                log::error!("[{}] Failed to persist swap: {e}", hash.short());
            }
        }
    }

    fn spawn_worker(&self, name: String, f: impl FnOnce() + Send + 'static) {
        match thread::Builder::new().name(name).spawn(f) {
            Ok(handle) => {
                if let Ok(mut workers) = self.workers.lock() {
                    // Drop handles of finished workers so the list stays
                    // small under churn.
                    workers.retain(|h| !h.is_finished());
                    workers.push(handle);
                }
            }
            Err(e) => log::error!("Failed to spawn worker thread: {e}"),
        }
    }

    /// Drains workers, stops the observer and flushes state.
    fn finish(&mut self) {
        log::info!("Coordinator shutting down");
        self.observer.shutdown();

        if let Ok(mut workers) = self.workers.lock() {
            log::info!("Joining {} worker threads", workers.len());
            while let Some(handle) = workers.pop() {
                let name = handle
                    .thread()
                    .name()
                    .unwrap_or("unnamed")
                    .to_string();
                if handle.join().is_err() {
                    log::error!("Worker thread {name} panicked");
                }
            }
        }
        if let Some(handle) = self.observer_handle.take() {
            if handle.join().is_err() {
                log::error!("Observer thread panicked");
            }
        }
        if let Ok(book) = self.book.lock() {
            book.log_state();
        }
        log::info!("Coordinator shutdown complete");
    }
}
