//! Token registry capability: unique ids, ownership and mutable metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Longest accepted token title, in characters.
pub const MAX_TITLE_CHARS: usize = 100;
/// Longest accepted note, in characters.
pub const MAX_NOTE_CHARS: usize = 140;
/// Longest accepted identifiers/attributes strings, in bytes.
pub const MAX_OPAQUE_BYTES: usize = 500;

/// Mutable metadata attached to a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    /// Display title, 1–100 characters.
    pub title: String,
    /// Free-form category label.
    pub category: String,
    /// Opaque identifier blob (serials, VINs, …), at most 500 bytes.
    pub identifiers: String,
    /// Opaque attribute blob, at most 500 bytes.
    pub attributes: String,
    /// Owner note, at most 140 characters.
    pub note: String,
    /// Once set, metadata can never be mutated again.
    pub frozen: bool,
}

impl TokenMeta {
    /// Validates metadata shape at mint time.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > MAX_TITLE_CHARS {
            return Err(LedgerError::InvalidMetadata("title length outside [1, 100]"));
        }
        if self.note.chars().count() > MAX_NOTE_CHARS {
            return Err(LedgerError::InvalidMetadata("note longer than 140 chars"));
        }
        if self.identifiers.len() > MAX_OPAQUE_BYTES {
            return Err(LedgerError::InvalidMetadata("identifiers longer than 500 bytes"));
        }
        if self.attributes.len() > MAX_OPAQUE_BYTES {
            return Err(LedgerError::InvalidMetadata("attributes longer than 500 bytes"));
        }
        Ok(())
    }
}

/// A minted token: id, current owner and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Unique id, never reused.
    pub id: u64,
    /// Current owner account on the asset ledger.
    pub owner: String,
    /// Mutable metadata.
    pub meta: TokenMeta,
}

/// Owns the set of tokens keyed by id.
///
/// Escrow preconditions are enforced one level up by the ledger entity; this
/// capability only knows about ownership and metadata.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenRegistry {
    tokens: HashMap<u64, Token>,
}

impl TokenRegistry {
    /// Creates a token owned by `minter`. Ids must be positive and unused.
    pub fn mint(&mut self, minter: &str, token_id: u64, meta: TokenMeta) -> Result<(), LedgerError> {
        if token_id == 0 {
            return Err(LedgerError::InvalidTokenId);
        }
        if self.tokens.contains_key(&token_id) {
            return Err(LedgerError::DuplicateTokenId(token_id));
        }
        meta.validate()?;
        self.tokens.insert(
            token_id,
            Token {
                id: token_id,
                owner: minter.to_string(),
                meta,
            },
        );
        Ok(())
    }

    /// Returns the token, or `UnknownToken`.
    pub fn get(&self, token_id: u64) -> Result<&Token, LedgerError> {
        self.tokens
            .get(&token_id)
            .ok_or(LedgerError::UnknownToken(token_id))
    }

    /// Current owner of a token.
    pub fn owner_of(&self, token_id: u64) -> Result<&str, LedgerError> {
        Ok(self.get(token_id)?.owner.as_str())
    }

    /// Replaces the note. Caller must own the token and metadata must not be
    /// frozen; the escrow precondition is checked by the ledger entity.
    pub fn set_note(&mut self, caller: &str, token_id: u64, note: &str) -> Result<(), LedgerError> {
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken(token_id))?;
        if token.owner != caller {
            return Err(LedgerError::NotOwner);
        }
        if token.meta.frozen {
            return Err(LedgerError::Frozen);
        }
        let note_len = note.chars().count();
        if note_len > MAX_NOTE_CHARS {
            return Err(LedgerError::NoteTooLong(note_len));
        }
        token.meta.note = note.to_string();
        Ok(())
    }

    /// Permanently freezes metadata.
    pub fn freeze(&mut self, caller: &str, token_id: u64) -> Result<(), LedgerError> {
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken(token_id))?;
        if token.owner != caller {
            return Err(LedgerError::NotOwner);
        }
        if token.meta.frozen {
            return Err(LedgerError::AlreadyFrozen);
        }
        token.meta.frozen = true;
        Ok(())
    }

    /// Reassigns ownership. Authorization and escrow preconditions are the
    /// ledger entity's responsibility; this is the raw move.
    pub fn set_owner(&mut self, token_id: u64, new_owner: &str) -> Result<(), LedgerError> {
        let token = self
            .tokens
            .get_mut(&token_id)
            .ok_or(LedgerError::UnknownToken(token_id))?;
        token.owner = new_owner.to_string();
        Ok(())
    }

    /// Number of minted tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True when no token has been minted.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str) -> TokenMeta {
        TokenMeta {
            title: title.to_string(),
            category: "vehicle".to_string(),
            ..TokenMeta::default()
        }
    }

    #[test]
    fn test_mint_and_owner() {
        let mut reg = TokenRegistry::default();
        reg.mint("alice", 1, meta("2019 Audi A4")).unwrap();
        assert_eq!(reg.owner_of(1).unwrap(), "alice");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_mint_rejects_zero_and_duplicate() {
        let mut reg = TokenRegistry::default();
        assert_eq!(
            reg.mint("alice", 0, meta("x")),
            Err(LedgerError::InvalidTokenId)
        );
        reg.mint("alice", 1, meta("x")).unwrap();
        assert_eq!(
            reg.mint("bob", 1, meta("y")),
            Err(LedgerError::DuplicateTokenId(1))
        );
    }

    #[test]
    fn test_title_boundaries() {
        let mut reg = TokenRegistry::default();
        assert!(reg.mint("a", 1, meta("")).is_err());
        assert!(reg.mint("a", 2, meta(&"t".repeat(1))).is_ok());
        assert!(reg.mint("a", 3, meta(&"t".repeat(100))).is_ok());
        assert!(reg.mint("a", 4, meta(&"t".repeat(101))).is_err());
    }

    #[test]
    fn test_note_boundaries() {
        let mut reg = TokenRegistry::default();
        reg.mint("a", 1, meta("t")).unwrap();
        assert!(reg.set_note("a", 1, "").is_ok());
        assert!(reg.set_note("a", 1, &"n".repeat(140)).is_ok());
        assert_eq!(
            reg.set_note("a", 1, &"n".repeat(141)),
            Err(LedgerError::NoteTooLong(141))
        );
    }

    #[test]
    fn test_opaque_byte_limits() {
        let mut reg = TokenRegistry::default();
        let mut m = meta("t");
        m.identifiers = "i".repeat(501);
        assert!(reg.mint("a", 1, m.clone()).is_err());
        m.identifiers = "i".repeat(500);
        assert!(reg.mint("a", 1, m).is_ok());
    }

    #[test]
    fn test_freeze_forbids_note_updates() {
        let mut reg = TokenRegistry::default();
        reg.mint("a", 1, meta("t")).unwrap();
        reg.freeze("a", 1).unwrap();
        assert_eq!(reg.set_note("a", 1, "new"), Err(LedgerError::Frozen));
        assert_eq!(reg.freeze("a", 1), Err(LedgerError::AlreadyFrozen));
    }

    #[test]
    fn test_only_owner_mutates() {
        let mut reg = TokenRegistry::default();
        reg.mint("a", 1, meta("t")).unwrap();
        assert_eq!(reg.set_note("mallory", 1, "x"), Err(LedgerError::NotOwner));
        assert_eq!(reg.freeze("mallory", 1), Err(LedgerError::NotOwner));
    }
}
