//! Public observer service for sending commands to and receiving events from
//! the observer task.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::protocol::hashlock::HashLock;

use super::{
    api_backend::ChainSource,
    observer::{Observer, ObserverCommand, ObserverEvent},
    registry::ObserverRegistry,
    ws_backend::WsBackend,
};

/// Client-facing handle for the observer thread.
#[derive(Clone)]
pub struct ObserverService {
    tx: Sender<ObserverCommand>,
    rx: Arc<Mutex<Receiver<ObserverEvent>>>,
    pending_events: Arc<AtomicUsize>,
}

impl ObserverService {
    /// Wraps the command sender and event receiver.
    pub fn new(
        tx: Sender<ObserverCommand>,
        rx: Receiver<ObserverEvent>,
        pending_events: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending_events,
        }
    }

    /// Registers an address watch for a swap.
    pub fn watch_funding(&self, hash: HashLock, address: String, min_sats: u64) {
        let _ = self.tx.send(ObserverCommand::WatchFunding {
            hash,
            address,
            min_sats,
        });
    }

    /// Asks the observer to forget a reorged funding tx and scan again.
    pub fn rescan_funding(&self, hash: HashLock) {
        let _ = self.tx.send(ObserverCommand::RescanFunding { hash });
    }

    /// Stops watching a swap.
    pub fn unwatch(&self, hash: HashLock) {
        let _ = self.tx.send(ObserverCommand::Unwatch { hash });
    }

    /// Attempts a non-blocking receive; returns `None` if no event is
    /// pending.
    pub fn poll_event(&self) -> Option<ObserverEvent> {
        let event = self.rx.lock().ok()?.try_recv().ok()?;
        self.pending_events.fetch_sub(1, Relaxed);
        Some(event)
    }

    /// Signals the observer to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ObserverCommand::Shutdown);
    }
}

/// Starts the observer on its own thread and returns the service handle.
///
/// The registry is shared with the caller (it clones over an `Arc`), so
/// recovery and stats read the same state the observer mutates.
pub fn start_observer_service(
    source: Box<dyn ChainSource>,
    ws_url: Option<&str>,
    registry: ObserverRegistry,
    min_confirmations: u64,
    poll_interval: Duration,
) -> (ObserverService, JoinHandle<()>) {
    let (tx_commands, rx_commands) = mpsc::channel();
    let (tx_events, rx_events) = mpsc::channel();
    let pending_events = Arc::new(AtomicUsize::new(0));

    let ws = ws_url.map(WsBackend::start);
    let mut observer = Observer::new(
        source,
        ws,
        registry,
        rx_commands,
        tx_events,
        pending_events.clone(),
        min_confirmations,
        poll_interval,
    );

    let handle = thread::Builder::new()
        .name("Observer thread".to_string())
        .spawn(move || observer.run())
        .expect("failed to spawn observer thread");

    (
        ObserverService::new(tx_commands, rx_events, pending_events),
        handle,
    )
}
