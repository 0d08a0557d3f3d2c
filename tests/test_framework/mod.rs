//! A framework to write functional tests for the swap coordinator.
//!
//! Spawns a coordinator against a scripted in-memory Bitcoin chain source and
//! the embedded asset ledger. Tests drive the chain (fund, confirm, spend,
//! reorg) and assert on swap state transitions through the admin handle.
//!
//! Build with `--features integration-test` so the loop intervals and escrow
//! lead times shrink to test scale.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use assetswap::{
    actuator::embedded::EmbeddedLedger,
    chain::{
        api_backend::{ChainSource, ChainTx, ChainVin, ChainVout, OutSpend, TxStatus},
        error::ObserverError,
    },
    coordinator::{
        config::CoordinatorConfig,
        swap::{SwapRequest, SwapStatus},
        Coordinator, CoordinatorHandle,
    },
    ledger::{token::TokenMeta, AssetHtlcLedger},
    protocol::hashlock::{HashLock, Preimage},
    utill::now_secs,
};
use tempfile::TempDir;

#[derive(Default)]
struct ChainState {
    by_address: HashMap<String, Vec<ChainTx>>,
    by_txid: HashMap<String, ChainTx>,
    outspends: HashMap<String, Vec<OutSpend>>,
    tip: u64,
}

/// Scripted in-memory chain shared between the test and the observer thread.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    /// Adds a transaction paying `sats` to `address`, mined at `height`
    /// (`None` keeps it in the mempool).
    pub fn fund_address(&self, txid: &str, address: &str, sats: u64, height: Option<u64>) {
        let tx = ChainTx {
            txid: txid.to_string(),
            vin: vec![],
            vout: vec![ChainVout {
                scriptpubkey_address: Some(address.to_string()),
                value: sats,
            }],
            status: TxStatus {
                confirmed: height.is_some(),
                block_height: height,
                block_time: height.map(|_| now_secs()),
            },
        };
        let mut state = self.state.lock().unwrap();
        state.by_txid.insert(txid.to_string(), tx.clone());
        state
            .by_address
            .entry(address.to_string())
            .or_default()
            .push(tx);
    }

    /// Spends `funding_txid` with a witness stack revealing `secret`.
    pub fn spend_revealing_secret(&self, funding_txid: &str, spend_txid: &str, secret: &Preimage) {
        let spend = ChainTx {
            txid: spend_txid.to_string(),
            vin: vec![ChainVin {
                txid: funding_txid.to_string(),
                vout: 0,
                witness: vec![
                    "30".repeat(71),
                    "02".repeat(33),
                    secret.to_string(),
                    "01".to_string(),
                    "51".repeat(80),
                ],
            }],
            vout: vec![],
            status: TxStatus::default(),
        };
        let mut state = self.state.lock().unwrap();
        state.by_txid.insert(spend_txid.to_string(), spend);
        state.outspends.insert(
            funding_txid.to_string(),
            vec![OutSpend {
                spent: true,
                txid: Some(spend_txid.to_string()),
            }],
        );
    }

    /// Removes a transaction from the best chain, simulating a reorg.
    pub fn reorg_out(&self, txid: &str) {
        self.state.lock().unwrap().by_txid.remove(txid);
    }
}

impl ChainSource for MockChain {
    fn address_txs(&self, address: &str) -> Result<Vec<ChainTx>, ObserverError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .by_address
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    fn tx(&self, txid: &str) -> Result<Option<ChainTx>, ObserverError> {
        Ok(self.state.lock().unwrap().by_txid.get(txid).cloned())
    }

    fn outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ObserverError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outspends
            .get(txid)
            .cloned()
            .unwrap_or_default())
    }

    fn tip_height(&self) -> Result<u64, ObserverError> {
        Ok(self.state.lock().unwrap().tip)
    }
}

/// One running coordinator with its chain, ledger and data directory.
pub struct TestFramework {
    pub handle: CoordinatorHandle,
    pub chain: MockChain,
    pub ledger: Arc<Mutex<AssetHtlcLedger>>,
    join: Option<JoinHandle<()>>,
    _data_dir: TempDir,
}

impl TestFramework {
    /// Boots a coordinator with test-scale intervals. `head_start_secs`
    /// controls both the deadline timer and the escrow expiry adjustment.
    pub fn init(head_start_secs: u64) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let data_dir = TempDir::new().unwrap();
        let chain = MockChain::new();
        chain.set_tip(100);

        let ledger = Arc::new(Mutex::new(AssetHtlcLedger::new()));
        let client = Arc::new(EmbeddedLedger::new(ledger.clone(), "coordinator"));

        let config = CoordinatorConfig {
            poll_interval_ms: 200,
            min_confirmations: 1,
            head_start_secs,
            max_retries: 2,
            ..CoordinatorConfig::default()
        };

        let (handle, join) =
            Coordinator::start(config, data_dir.path(), client, Box::new(chain.clone())).unwrap();

        TestFramework {
            handle,
            chain,
            ledger,
            join: Some(join),
            _data_dir: data_dir,
        }
    }

    /// Mints a token to `owner` on the embedded ledger.
    pub fn mint_token(&self, owner: &str, token_id: u64, title: &str) {
        self.ledger
            .lock()
            .unwrap()
            .mint(
                owner,
                token_id,
                TokenMeta {
                    title: title.to_string(),
                    category: "vehicle".to_string(),
                    ..TokenMeta::default()
                },
                now_secs(),
            )
            .unwrap();
    }

    /// A standard swap registration for token 1.
    pub fn swap_request(hash: HashLock, deadline: u64) -> SwapRequest {
        SwapRequest {
            hash,
            token_id: 1,
            price_sats: 50_000_000,
            seller_btc_addr: "tb1qseller".to_string(),
            seller_asset_addr: "seller".to_string(),
            buyer_asset_addr: "buyer".to_string(),
            deadline,
            asset_title: "2019 Audi A4".to_string(),
        }
    }

    /// Polls until the swap reaches `expected` or the timeout elapses.
    pub fn wait_for_status(&self, hash: &HashLock, expected: SwapStatus, timeout: Duration) {
        let start = Instant::now();
        loop {
            let current = self.handle.get_swap(hash).unwrap().map(|swap| swap.status);
            if current == Some(expected) {
                return;
            }
            if start.elapsed() > timeout {
                panic!("Timed out waiting for {expected}, swap is {current:?}");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Shuts the coordinator down and joins its thread.
    pub fn stop(mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            join.join().unwrap();
        }
    }
}

/// The standard test secret and its commitment.
pub fn test_secret() -> (Preimage, HashLock) {
    let preimage = Preimage([0xaa; 32]);
    let hash = HashLock::commit(&preimage);
    (preimage, hash)
}
