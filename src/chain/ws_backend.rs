//! WebSocket push channel for chain notifications.
//!
//! A notifier endpoint pushes JSON frames of the form
//! `{"type":"block","height":123}` and
//! `{"type":"address","address":"tb1..."}`. Both only *accelerate* the poll
//! loop: every observation still goes through the same idempotent pipeline,
//! so a missing or flaky feed costs latency, never correctness.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use serde::Deserialize;

/// Events delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A new block was connected at this height.
    NewBlock {
        /// New tip height.
        height: u64,
    },
    /// Activity was seen on a watched address.
    AddressActivity {
        /// The address with new activity.
        address: String,
    },
}

#[derive(Deserialize)]
struct WsFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    height: Option<u64>,
    #[serde(default)]
    address: Option<String>,
}

/// Reader half of the push channel. The socket lives on its own thread;
/// `poll` never blocks.
pub struct WsBackend {
    rx: Receiver<WsEvent>,
    shutdown: Arc<AtomicBool>,
}

impl WsBackend {
    /// Connects to the notifier endpoint and starts the reader thread.
    ///
    /// The thread reconnects with a fixed delay on any socket error until
    /// the backend is dropped.
    pub fn start(url: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let url = url.to_string();

        let _ = thread::Builder::new()
            .name("ws-listener".to_string())
            .spawn(move || run_listener(&url, tx, thread_shutdown));

        Self { rx, shutdown }
    }

    /// Non-blocking poll for the next pushed event.
    pub fn poll(&self) -> Option<WsEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for WsBackend {
    fn drop(&mut self) {
        self.shutdown.store(true, Relaxed);
    }
}

fn run_listener(url: &str, tx: Sender<WsEvent>, shutdown: Arc<AtomicBool>) {
    const RECONNECT_DELAY: Duration = Duration::from_secs(5);

    while !shutdown.load(Relaxed) {
        let mut socket = match tungstenite::connect(url) {
            Ok((socket, _)) => {
                log::info!("Chain notifier connected: {url}");
                socket
            }
            Err(e) => {
                log::warn!("Chain notifier connect failed ({e}), retrying");
                thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };

        loop {
            if shutdown.load(Relaxed) {
                let _ = socket.close(None);
                return;
            }
            match socket.read() {
                Ok(tungstenite::Message::Text(text)) => {
                    if let Some(event) = parse_frame(&text) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                Ok(tungstenite::Message::Ping(payload)) => {
                    let _ = socket.send(tungstenite::Message::Pong(payload));
                }
                Ok(tungstenite::Message::Close(_)) | Err(_) => {
                    log::warn!("Chain notifier disconnected, reconnecting");
                    break;
                }
                Ok(_) => {}
            }
        }
        thread::sleep(RECONNECT_DELAY);
    }
}

fn parse_frame(text: &str) -> Option<WsEvent> {
    let frame: WsFrame = serde_json::from_str(text).ok()?;
    match frame.kind.as_str() {
        "block" => Some(WsEvent::NewBlock {
            height: frame.height?,
        }),
        "address" => Some(WsEvent::AddressActivity {
            address: frame.address?,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_frame() {
        assert_eq!(
            parse_frame(r#"{"type":"block","height":123}"#),
            Some(WsEvent::NewBlock { height: 123 })
        );
    }

    #[test]
    fn test_parse_address_frame() {
        assert_eq!(
            parse_frame(r#"{"type":"address","address":"tb1qabc"}"#),
            Some(WsEvent::AddressActivity {
                address: "tb1qabc".to_string()
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_partial_frames() {
        assert_eq!(parse_frame(r#"{"type":"mempool"}"#), None);
        assert_eq!(parse_frame(r#"{"type":"block"}"#), None);
        assert_eq!(parse_frame("not json"), None);
    }
}
