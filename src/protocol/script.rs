//! The Bitcoin-side HTLC script (BIP-199 form) and its witnesses.
//!
//! ```text
//! OP_IF
//!   OP_SHA256 <H> OP_EQUALVERIFY OP_DUP OP_HASH160 <receiverPKH>
//! OP_ELSE
//!   <T_btc> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <senderPKH>
//! OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! The output is funded as P2WSH. The receiver claims with
//! `<sig> <S> <1> <redeemScript>`, the funder refunds after `T_btc` with
//! `<sig> <0> <redeemScript>`.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    hex::FromHex,
    opcodes::all::{
        OP_CHECKSIG, OP_CLTV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160,
        OP_IF, OP_SHA256,
    },
    script, Address, Network, PubkeyHash, ScriptBuf, Witness,
};

use super::{
    error::ProtocolError,
    hashlock::{HashLock, Preimage},
};

/// Everything needed to reproduce one swap's BTC-side HTLC script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcParams {
    /// The shared commitment both legs settle against.
    pub hash: HashLock,
    /// Hash160 of the receiver's (seller's) public key.
    pub receiver_pkh: PubkeyHash,
    /// Hash160 of the funder's (buyer's) public key, for the refund path.
    pub sender_pkh: PubkeyHash,
    /// Absolute BTC-leg refund locktime, unix seconds.
    pub t_btc: u64,
}

impl HtlcParams {
    /// Builds the BIP-199 redeem script.
    pub fn redeem_script(&self) -> Result<ScriptBuf, ProtocolError> {
        let locktime = LockTime::from_time(
            u32::try_from(self.t_btc)
                .map_err(|_| ProtocolError::General("BTC locktime beyond u32 range"))?,
        )?;
        Ok(script::Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_SHA256)
            .push_slice(self.hash.0)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.receiver_pkh.to_byte_array())
            .push_opcode(OP_ELSE)
            .push_lock_time(locktime)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.sender_pkh.to_byte_array())
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script())
    }

    /// P2WSH address carrying the redeem script by hash.
    pub fn p2wsh_address(&self, network: Network) -> Result<Address, ProtocolError> {
        Ok(Address::p2wsh(&self.redeem_script()?, network))
    }

    /// Witness for the claim path: `<sig> <pubkey> <S> <1> <redeemScript>`.
    pub fn claim_witness(
        &self,
        signature: &[u8],
        pubkey: &[u8],
        preimage: &Preimage,
    ) -> Result<Witness, ProtocolError> {
        let mut witness = Witness::new();
        witness.push(signature);
        witness.push(pubkey);
        witness.push(preimage.0);
        witness.push([1u8]);
        witness.push(self.redeem_script()?.as_bytes());
        Ok(witness)
    }

    /// Witness for the refund path: `<sig> <pubkey> <0> <redeemScript>`.
    ///
    /// The `0` selector is the empty vector per minimal-if.
    pub fn refund_witness(&self, signature: &[u8], pubkey: &[u8]) -> Result<Witness, ProtocolError> {
        let mut witness = Witness::new();
        witness.push(signature);
        witness.push(pubkey);
        witness.push(&[] as &[u8]);
        witness.push(self.redeem_script()?.as_bytes());
        Ok(witness)
    }
}

/// Scans a witness stack (hex-encoded elements, as chain APIs return them)
/// for the 32-byte preimage opening `hash`.
///
/// Only elements of exactly 64 lowercase hex characters are candidates;
/// everything else (signatures, pubkeys, the redeem script) is skipped.
pub fn preimage_from_witness(witness_hex: &[String], hash: &HashLock) -> Option<Preimage> {
    for element in witness_hex {
        if element.len() != 64 || !is_lower_hex(element) {
            continue;
        }
        let bytes = match Vec::<u8>::from_hex(element) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let mut candidate = [0u8; 32];
        candidate.copy_from_slice(&bytes);
        let candidate = Preimage(candidate);
        if candidate.opens(hash) {
            return Some(candidate);
        }
    }
    None
}

fn is_lower_hex(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::DisplayHex;

    fn params() -> HtlcParams {
        HtlcParams {
            hash: HashLock::commit(&Preimage([0xaa; 32])),
            receiver_pkh: PubkeyHash::from_byte_array([0x11; 20]),
            sender_pkh: PubkeyHash::from_byte_array([0x22; 20]),
            t_btc: 1_700_000_000,
        }
    }

    #[test]
    fn test_redeem_script_shape() {
        let asm = params().redeem_script().unwrap().to_asm_string();
        for op in [
            "OP_IF",
            "OP_SHA256",
            "OP_EQUALVERIFY",
            "OP_HASH160",
            "OP_ELSE",
            "OP_CLTV",
            "OP_DROP",
            "OP_ENDIF",
            "OP_CHECKSIG",
        ] {
            assert!(asm.contains(op), "missing {op} in {asm}");
        }
    }

    #[test]
    fn test_locktime_below_threshold_rejected() {
        // Values below 500_000_000 are block heights, not unix times.
        let mut p = params();
        p.t_btc = 1000;
        assert!(p.redeem_script().is_err());
    }

    #[test]
    fn test_p2wsh_address_is_deterministic() {
        let a1 = params().p2wsh_address(Network::Testnet).unwrap();
        let a2 = params().p2wsh_address(Network::Testnet).unwrap();
        assert_eq!(a1, a2);
        assert!(a1.to_string().starts_with("tb1"));
    }

    #[test]
    fn test_preimage_from_witness_claim_path() {
        let preimage = Preimage([0xaa; 32]);
        let p = params();
        let witness = p.claim_witness(&[0x30; 71], &[0x02; 33], &preimage).unwrap();

        let hex_stack: Vec<String> = witness
            .iter()
            .map(|elem| elem.to_lower_hex_string())
            .collect();
        assert_eq!(preimage_from_witness(&hex_stack, &p.hash), Some(preimage));
    }

    #[test]
    fn test_preimage_from_witness_ignores_refund_path() {
        let p = params();
        let witness = p.refund_witness(&[0x30; 71], &[0x02; 33]).unwrap();
        let hex_stack: Vec<String> = witness
            .iter()
            .map(|elem| elem.to_lower_hex_string())
            .collect();
        assert_eq!(preimage_from_witness(&hex_stack, &p.hash), None);
    }

    #[test]
    fn test_preimage_from_witness_skips_lookalikes() {
        let p = params();
        // Right length, wrong bytes.
        let wrong = Preimage([0xbb; 32]).to_string();
        // 32 bytes of uppercase hex is not a canonical witness dump.
        let upper = Preimage([0xaa; 32]).to_string().to_uppercase();
        assert_eq!(preimage_from_witness(&[wrong, upper], &p.hash), None);
    }
}
