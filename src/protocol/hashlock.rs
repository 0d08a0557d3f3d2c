//! Hashlock primitives shared by both swap legs.
//!
//! The commitment is always SHA-256 over the raw 32-byte preimage so that the
//! same secret settles the Bitcoin script (`OP_SHA256`) and the asset escrow.

use std::{fmt, str::FromStr};

use bitcoin::{
    hashes::{sha256, Hash},
    hex::{DisplayHex, FromHex},
    secp256k1::rand::{rngs::OsRng, RngCore},
};
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// Length of the swap secret in bytes.
pub const PREIMAGE_LEN: usize = 32;

/// The 32-byte swap secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Preimage(pub [u8; PREIMAGE_LEN]);

/// The 32-byte SHA-256 commitment to a [`Preimage`], shared publicly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashLock(pub [u8; 32]);

impl HashLock {
    /// Computes the commitment for a preimage.
    pub fn commit(preimage: &Preimage) -> Self {
        HashLock(sha256::Hash::hash(&preimage.0).to_byte_array())
    }

    /// True when every byte is zero. The ledger rejects a zero hash at open.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// First 8 hex characters, for compact log lines.
    pub fn short(&self) -> String {
        self.0[..4].to_lower_hex_string()
    }
}

impl Preimage {
    /// Verifies that this preimage opens the given commitment, byte-exact.
    pub fn opens(&self, hash: &HashLock) -> bool {
        HashLock::commit(self) == *hash
    }
}

/// Draws a fresh 32-byte secret from the OS RNG and returns it with its
/// commitment.
pub fn generate_secret() -> Result<(Preimage, HashLock), ProtocolError> {
    let mut bytes = [0u8; PREIMAGE_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| ProtocolError::RngFailure)?;
    let preimage = Preimage(bytes);
    let hash = HashLock::commit(&preimage);
    Ok((preimage, hash))
}

/// Verifies a candidate secret against a commitment given as hex strings.
///
/// Both inputs are normalized (optional `0x` prefix stripped, lowercased) and
/// must decode to exactly 32 bytes.
pub fn verify_hex(secret_hex: &str, hash_hex: &str) -> Result<bool, ProtocolError> {
    let preimage = Preimage::from_str(secret_hex)?;
    let hash = HashLock::from_str(hash_hex)?;
    Ok(preimage.opens(&hash))
}

fn parse_hex32(s: &str, field: &'static str) -> Result<[u8; 32], ProtocolError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s).to_lowercase();
    if stripped.len() != 64 {
        return Err(ProtocolError::MalformedHex {
            field,
            got_len: stripped.len(),
        });
    }
    let bytes = Vec::<u8>::from_hex(&stripped).map_err(|_| ProtocolError::MalformedHex {
        field,
        got_len: stripped.len(),
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

impl FromStr for Preimage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Preimage(parse_hex32(s, "preimage")?))
    }
}

impl FromStr for HashLock {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HashLock(parse_hex32(s, "hashlock")?))
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_lower_hex_string())
    }
}

impl fmt::Display for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_lower_hex_string())
    }
}

// Secrets never land in logs in full; Debug shows the commitment-safe prefix.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage({}..)", self.0[..4].to_lower_hex_string())
    }
}

impl fmt::Debug for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashLock({})", self.0.to_lower_hex_string())
    }
}

impl Serialize for Preimage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Preimage::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for HashLock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HashLock {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HashLock::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_commits() {
        let (preimage, hash) = generate_secret().unwrap();
        assert!(preimage.opens(&hash));
        assert_eq!(HashLock::commit(&preimage), hash);
    }

    #[test]
    fn test_verify_hex_accepts_prefix_and_case() {
        let preimage = Preimage([0xaa; 32]);
        let hash = HashLock::commit(&preimage);

        let secret_hex = format!("0x{}", preimage);
        let hash_hex = hash.to_string().to_uppercase();
        assert!(verify_hex(&secret_hex, &hash_hex).unwrap());
    }

    #[test]
    fn test_verify_hex_rejects_wrong_secret() {
        let hash = HashLock::commit(&Preimage([0xaa; 32]));
        let wrong = Preimage([0xbb; 32]).to_string();
        assert!(!verify_hex(&wrong, &hash.to_string()).unwrap());
    }

    #[test]
    fn test_malformed_hex_lengths() {
        assert!(matches!(
            Preimage::from_str("abcd"),
            Err(ProtocolError::MalformedHex { got_len: 4, .. })
        ));
        // 63 digits
        let short = "a".repeat(63);
        assert!(Preimage::from_str(&short).is_err());
        // 64 digits but not hex
        let bad = "zz".repeat(32);
        assert!(Preimage::from_str(&bad).is_err());
    }

    #[test]
    fn test_display_is_lowercase_unprefixed() {
        let hash = HashLock([0xAB; 32]);
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s, s.to_lowercase());
        assert!(!s.starts_with("0x"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let (preimage, hash) = generate_secret().unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        let back: HashLock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);

        let cbor = serde_cbor::to_vec(&preimage).unwrap();
        let back: Preimage = serde_cbor::from_slice(&cbor).unwrap();
        assert_eq!(back, preimage);
    }

    #[test]
    fn test_debug_never_prints_full_secret() {
        let preimage = Preimage([0xcc; 32]);
        let dbg = format!("{:?}", preimage);
        assert!(!dbg.contains(&preimage.to_string()));
    }
}
