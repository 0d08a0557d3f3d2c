//! Chain data source: trait seam plus the HTTP backend querying an
//! Esplora-style REST API.

use serde::{Deserialize, Deserializer, Serialize};

use super::error::ObserverError;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Transaction inclusion status as reported by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxStatus {
    /// Whether the transaction is in a block on the current best chain.
    #[serde(default)]
    pub confirmed: bool,
    /// Height of the including block, when confirmed.
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Timestamp of the including block, when confirmed.
    #[serde(default)]
    pub block_time: Option<u64>,
}

/// One transaction input with its witness stack (hex-encoded elements).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainVin {
    /// Funding txid this input spends.
    #[serde(default)]
    pub txid: String,
    /// Output index this input spends.
    #[serde(default)]
    pub vout: u32,
    /// Witness stack, one lowercase hex string per element.
    #[serde(default)]
    pub witness: Vec<String>,
}

/// One transaction output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainVout {
    /// Address the output pays, when the script is standard.
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    /// Output value in satoshis. Foreign APIs reporting BTC floats are
    /// rounded to the nearest satoshi on decode.
    #[serde(deserialize_with = "sats_from_json", default)]
    pub value: u64,
}

/// A transaction as observed on the Bitcoin chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainTx {
    /// Transaction id.
    pub txid: String,
    /// Inputs with witness data.
    #[serde(default)]
    pub vin: Vec<ChainVin>,
    /// Outputs.
    #[serde(default)]
    pub vout: Vec<ChainVout>,
    /// Inclusion status.
    #[serde(default)]
    pub status: TxStatus,
}

impl ChainTx {
    /// Total satoshis this transaction pays to `address`.
    pub fn paid_to(&self, address: &str) -> u64 {
        self.vout
            .iter()
            .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
            .map(|out| out.value)
            .sum()
    }

    /// Confirmation count relative to the given tip height; zero while
    /// unconfirmed.
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        match (self.status.confirmed, self.status.block_height) {
            (true, Some(height)) if tip_height >= height => tip_height - height + 1,
            _ => 0,
        }
    }
}

/// Spend status of one output, from `/tx/{txid}/outspends`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutSpend {
    /// Whether the output has been spent.
    #[serde(default)]
    pub spent: bool,
    /// Spending transaction id, when spent.
    #[serde(default)]
    pub txid: Option<String>,
}

/// Read-only view of the Bitcoin chain used by the observer.
///
/// The REST backend implements this against a live API; tests drive the
/// observer with a scripted in-memory source.
pub trait ChainSource: Send {
    /// Transactions paying or spending from an address, newest first.
    fn address_txs(&self, address: &str) -> Result<Vec<ChainTx>, ObserverError>;
    /// A transaction by id; `None` when unknown to the current best chain.
    fn tx(&self, txid: &str) -> Result<Option<ChainTx>, ObserverError>;
    /// Spend status per output of a transaction.
    fn outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ObserverError>;
    /// Current best chain height.
    fn tip_height(&self) -> Result<u64, ObserverError>;
}

/// Lightweight wrapper around an Esplora-style REST API.
pub struct BitcoinApi {
    base_url: String,
    timeout_secs: u64,
}

impl BitcoinApi {
    /// Constructs a new REST wrapper for the given base URL.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn http_get(&self, path: &str) -> Result<minreq::Response, ObserverError> {
        let resp = minreq::get(self.url(path))
            .with_timeout(self.timeout_secs)
            .send()?;
        if !(200..300).contains(&resp.status_code) {
            let body = resp
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| String::new());
            return Err(ObserverError::HttpStatus {
                status: resp.status_code,
                body,
            });
        }
        Ok(resp)
    }
}

impl ChainSource for BitcoinApi {
    fn address_txs(&self, address: &str) -> Result<Vec<ChainTx>, ObserverError> {
        Ok(self.http_get(&format!("/address/{address}/txs"))?.json()?)
    }

    fn tx(&self, txid: &str) -> Result<Option<ChainTx>, ObserverError> {
        match self.http_get(&format!("/tx/{txid}")) {
            Ok(resp) => Ok(Some(resp.json()?)),
            Err(ObserverError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn outspends(&self, txid: &str) -> Result<Vec<OutSpend>, ObserverError> {
        Ok(self.http_get(&format!("/tx/{txid}/outspends"))?.json()?)
    }

    fn tip_height(&self) -> Result<u64, ObserverError> {
        let resp = self.http_get("/blocks/tip/height")?;
        resp.as_str()
            .map_err(|_| ObserverError::ParsingError)?
            .trim()
            .parse()
            .map_err(|_| ObserverError::ParsingError)
    }
}

/// Accepts integer satoshis or a BTC-denominated float, rounding the latter
/// to the nearest satoshi.
fn sats_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(sats) = n.as_u64() {
                Ok(sats)
            } else if let Some(btc) = n.as_f64() {
                Ok((btc * 100_000_000.0).round() as u64)
            } else {
                Err(serde::de::Error::custom("negative output value"))
            }
        }
        _ => Err(serde::de::Error::custom("output value must be a number")),
    }
}
