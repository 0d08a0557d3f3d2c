//! File-backed registry for watched swaps and the processed-txid cache.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    protocol::hashlock::{HashLock, Preimage},
    utill::RETIREMENT_SECS,
};

/// A preimage extracted from a spend witness, kept for crash recovery. The
/// secret is public knowledge once it appears on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealedSecret {
    /// The extracted 32-byte secret.
    pub preimage: Preimage,
    /// Transaction that carried the witness.
    pub reveal_txid: String,
}

/// One watched swap on the Bitcoin side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEntry {
    /// Hash commitment identifying the swap.
    pub hash: HashLock,
    /// Seller address the funding must pay.
    pub address: String,
    /// Minimum accepted funding amount, in satoshis.
    pub min_sats: u64,
    /// Funding txid once a qualifying payment was seen.
    pub funding_txid: Option<String>,
    /// Whether the confirmation threshold has been reported.
    pub confirmed_reported: bool,
    /// The preimage once extracted from a spend witness.
    pub revealed: Option<RevealedSecret>,
    /// Whether a reorg disappearance has been reported for the funding tx.
    pub drop_reported: bool,
}

impl WatchEntry {
    /// Fresh entry for a newly registered swap.
    pub fn new(hash: HashLock, address: String, min_sats: u64) -> Self {
        Self {
            hash,
            address,
            min_sats,
            funding_txid: None,
            confirmed_reported: false,
            revealed: None,
            drop_reported: false,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct RegistryData {
    watches: HashMap<HashLock, WatchEntry>,
    /// Txid → first-seen timestamp. Monotonic dedup for the event pipeline.
    processed: HashMap<String, u64>,
}

/// Registry used by the observer, persisted as CBOR with atomic writes.
#[derive(Clone)]
pub struct ObserverRegistry {
    path: PathBuf,
    data: Arc<Mutex<RegistryData>>,
}

impl ObserverRegistry {
    /// Loads registry data from disk, creating the file and parent
    /// directories if missing.
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let data = if path.exists() {
            match std::fs::read(&path) {
                Ok(bytes) => serde_cbor::from_slice(&bytes).unwrap_or_default(),
                Err(e) => {
                    log::error!("Failed to read observer registry {:?}: {}", path, e);
                    RegistryData::default()
                }
            }
        } else {
            RegistryData::default()
        };
        let registry = Self {
            path,
            data: Arc::new(Mutex::new(data)),
        };
        registry.flush();
        registry
    }

    fn flush(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create registry directory {:?}: {}", parent, e);
                return;
            }
        }
        let tmp = self.path.with_extension("tmp");
        if let Ok(data) = self.data.lock() {
            let bytes = match serde_cbor::to_vec(&*data) {
                Ok(b) => b,
                Err(e) => {
                    log::error!("Failed to serialize observer registry: {}", e);
                    return;
                }
            };
            if let Err(e) = std::fs::write(&tmp, &bytes) {
                log::error!("Failed to write tmp registry file {:?}: {}", tmp, e);
                return;
            }
            if let Err(e) = std::fs::rename(&tmp, &self.path) {
                log::error!("Failed to rename registry file into {:?}: {}", self.path, e);
            }
        }
    }

    fn with_data<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut RegistryData) -> T,
    {
        let mut data = self.data.lock().unwrap();
        f(&mut data)
    }

    /// Inserts or replaces a watch entry and flushes to disk.
    pub fn upsert_watch(&self, entry: &WatchEntry) {
        self.with_data(|data| data.watches.insert(entry.hash, entry.clone()));
        self.flush();
    }

    /// Removes a watch entry and flushes to disk.
    pub fn remove_watch(&self, hash: &HashLock) {
        self.with_data(|data| data.watches.remove(hash));
        self.flush();
    }

    /// Returns all current watch entries.
    pub fn list_watches(&self) -> Vec<WatchEntry> {
        self.with_data(|data| data.watches.values().cloned().collect())
    }

    /// Returns one watch entry.
    pub fn get_watch(&self, hash: &HashLock) -> Option<WatchEntry> {
        self.with_data(|data| data.watches.get(hash).cloned())
    }

    /// Records a txid as processed. Returns `false` when it was already in
    /// the cache, making duplicate deliveries no-ops.
    pub fn mark_processed(&self, txid: &str, now: u64) -> bool {
        let fresh = self.with_data(|data| {
            if data.processed.contains_key(txid) {
                false
            } else {
                data.processed.insert(txid.to_string(), now);
                true
            }
        });
        if fresh {
            self.flush();
        }
        fresh
    }

    /// Whether the txid is already in the processed cache.
    pub fn is_processed(&self, txid: &str) -> bool {
        self.with_data(|data| data.processed.contains_key(txid))
    }

    /// Evicts processed-txid entries older than the retirement window so the
    /// cache stays bounded. Entries referenced by a live watch are kept.
    pub fn evict_stale(&self, now: u64) {
        let evicted = self.with_data(|data| {
            let live: Vec<String> = data
                .watches
                .values()
                .filter_map(|w| w.funding_txid.clone())
                .collect();
            let before = data.processed.len();
            data.processed.retain(|txid, seen_at| {
                now.saturating_sub(*seen_at) < RETIREMENT_SECS || live.contains(txid)
            });
            before - data.processed.len()
        });
        if evicted > 0 {
            log::info!("Evicted {} stale processed txids", evicted);
            self.flush();
        }
    }

    /// Number of entries in the processed-txid cache.
    pub fn processed_count(&self) -> usize {
        self.with_data(|data| data.processed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::hashlock::Preimage;
    use tempfile::TempDir;

    fn hash(n: u8) -> HashLock {
        HashLock::commit(&Preimage([n; 32]))
    }

    #[test]
    fn test_load_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.cbor");
        assert!(!path.exists());
        let _reg = ObserverRegistry::load(&path);
        assert!(path.exists());
    }

    #[test]
    fn test_watch_upsert_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reg.cbor");

        let reg = ObserverRegistry::load(&path);
        reg.upsert_watch(&WatchEntry::new(hash(1), "tb1q".to_string(), 1000));

        let reg2 = ObserverRegistry::load(&path);
        let watches = reg2.list_watches();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].min_sats, 1000);
    }

    #[test]
    fn test_watch_remove() {
        let dir = TempDir::new().unwrap();
        let reg = ObserverRegistry::load(dir.path().join("reg.cbor"));
        reg.upsert_watch(&WatchEntry::new(hash(1), "tb1q".to_string(), 1));
        reg.remove_watch(&hash(1));
        assert!(reg.list_watches().is_empty());
    }

    #[test]
    fn test_processed_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let reg = ObserverRegistry::load(dir.path().join("reg.cbor"));
        assert!(reg.mark_processed("tx1", 100));
        assert!(!reg.mark_processed("tx1", 200));
        assert!(reg.is_processed("tx1"));
        assert!(!reg.is_processed("tx2"));
    }

    #[test]
    fn test_evict_stale_keeps_live_funding() {
        let dir = TempDir::new().unwrap();
        let reg = ObserverRegistry::load(dir.path().join("reg.cbor"));

        let mut entry = WatchEntry::new(hash(1), "tb1q".to_string(), 1);
        entry.funding_txid = Some("livetx".to_string());
        reg.upsert_watch(&entry);

        reg.mark_processed("livetx", 0);
        reg.mark_processed("oldtx", 0);
        reg.mark_processed("newtx", RETIREMENT_SECS + 50);

        reg.evict_stale(RETIREMENT_SECS + 100);
        assert!(reg.is_processed("livetx"));
        assert!(!reg.is_processed("oldtx"));
        assert!(reg.is_processed("newtx"));
    }
}
