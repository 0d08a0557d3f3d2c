//! The buyer handoff payload, rendered as QR/deep-link JSON or a BIP-21 URI.
//!
//! After registering a swap the seller hands the buyer everything needed to
//! fund the BTC leg from any wallet: the commitment, the price, the receiving
//! address and the deadline.

use serde::{Deserialize, Serialize};

use super::hashlock::HashLock;

/// Version tag carried by every payload.
pub const HANDOFF_VERSION: &str = "1.0";

/// JSON payload (version `"1.0"`) encoded into the buyer-facing QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPayload {
    /// Payload schema version.
    pub version: String,
    /// The shared hash commitment, 64 hex digits.
    #[serde(rename = "hashH")]
    pub hash: HashLock,
    /// Price in satoshis, as a decimal string.
    #[serde(rename = "priceBTC")]
    pub price_sats: String,
    /// Seller's BTC receiving address.
    #[serde(rename = "receiverAddress")]
    pub receiver_address: String,
    /// Asset-leg deadline, unix seconds.
    pub deadline: u64,
    /// Token being sold, as a decimal string.
    #[serde(rename = "tokenId")]
    pub token_id: String,
    /// Human-readable token title.
    #[serde(rename = "assetTitle")]
    pub asset_title: String,
    /// BTC network the payment must land on.
    #[serde(rename = "networkBTC")]
    pub network_btc: String,
    /// Asset ledger network identifier.
    #[serde(rename = "networkAsset")]
    pub network_asset: String,
}

impl HandoffPayload {
    /// Assembles a payload for a registered swap.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hash: HashLock,
        price_sats: u64,
        receiver_address: String,
        deadline: u64,
        token_id: u64,
        asset_title: String,
        network_btc: String,
        network_asset: String,
    ) -> Self {
        Self {
            version: HANDOFF_VERSION.to_string(),
            hash,
            price_sats: price_sats.to_string(),
            receiver_address,
            deadline,
            token_id: token_id.to_string(),
            asset_title,
            network_btc,
            network_asset,
        }
    }

    /// Alternative `bitcoin:` URI encoding for wallet compatibility.
    ///
    /// The amount is rendered in BTC with trailing zeros trimmed; label and
    /// message are percent-encoded.
    pub fn bip21_uri(&self) -> String {
        let sats: u64 = self.price_sats.parse().unwrap_or(0);
        let mut amount = format!("{}.{:08}", sats / 100_000_000, sats % 100_000_000);
        while amount.ends_with('0') {
            amount.pop();
        }
        if amount.ends_with('.') {
            amount.push('0');
        }
        let label = percent_encode(&self.asset_title);
        let message = percent_encode(&format!("HTLC swap, settle before {}", self.deadline));
        format!(
            "bitcoin:{}?amount={}&label={}&message={}",
            self.receiver_address, amount, label, message
        )
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::hashlock::Preimage;

    fn payload() -> HandoffPayload {
        HandoffPayload::new(
            HashLock::commit(&Preimage([0xaa; 32])),
            50_000_000,
            "tb1qexampleaddress".to_string(),
            1_700_010_800,
            1,
            "2019 Audi A4".to_string(),
            "testnet".to_string(),
            "assetnet-local".to_string(),
        )
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&payload()).unwrap();
        for field in [
            "\"version\":\"1.0\"",
            "\"hashH\"",
            "\"priceBTC\":\"50000000\"",
            "\"receiverAddress\"",
            "\"deadline\":1700010800",
            "\"tokenId\":\"1\"",
            "\"assetTitle\"",
            "\"networkBTC\":\"testnet\"",
            "\"networkAsset\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let p = payload();
        let json = serde_json::to_string(&p).unwrap();
        let back: HandoffPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_bip21_amount_in_btc() {
        let uri = payload().bip21_uri();
        assert!(uri.starts_with("bitcoin:tb1qexampleaddress?amount=0.5&"));
        assert!(uri.contains("label=2019%20Audi%20A4"));
    }

    #[test]
    fn test_bip21_whole_and_tiny_amounts() {
        let mut p = payload();
        p.price_sats = "100000000".to_string();
        assert!(p.bip21_uri().contains("amount=1.0&"));
        p.price_sats = "1".to_string();
        assert!(p.bip21_uri().contains("amount=0.00000001&"));
    }
}
