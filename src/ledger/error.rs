//! All asset-ledger related errors.

/// Represents errors returned by the asset HTLC ledger.
///
/// Every variant maps to one of four kinds (validation, authorization, state
/// precondition, cryptographic), all of which are surfaced to the caller
/// immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Token ids start at 1.
    InvalidTokenId,
    /// A token with this id already exists; ids are never reused.
    DuplicateTokenId(u64),
    /// Metadata failed shape validation.
    InvalidMetadata(&'static str),
    /// No token with this id exists.
    UnknownToken(u64),
    /// Caller is not the current owner of the token.
    NotOwner,
    /// Metadata is permanently frozen.
    Frozen,
    /// Metadata was already frozen.
    AlreadyFrozen,
    /// The token is locked in an active escrow.
    InEscrow,
    /// Note exceeds 140 characters.
    NoteTooLong(usize),
    /// Escrow buyer is the zero address or missing.
    InvalidBuyer,
    /// Escrow buyer equals the seller.
    BuyerIsSeller,
    /// Escrow hash commitment is zero.
    InvalidHash,
    /// Escrow price must be positive.
    InvalidPrice,
    /// Escrow expiry is not more than one hour away.
    ExpiryTooSoon,
    /// Escrow expiry is more than thirty days away.
    ExpiryTooFar,
    /// No active escrow on this token.
    NotInEscrow(u64),
    /// Caller is not the escrow buyer.
    NotBuyer,
    /// Escrow expired; claims are no longer accepted.
    Expired,
    /// The provided secret does not open the escrow commitment.
    BadSecret,
    /// Refund requested before expiry by someone other than the seller.
    RefundNotYet,
    /// Caller is not authorized to move this token.
    NotAuthorized,
}

impl LedgerError {
    /// Returns the error kind used by the retry policy. All ledger errors are
    /// terminal for the submitting operation.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidTokenId
            | LedgerError::DuplicateTokenId(_)
            | LedgerError::InvalidMetadata(_)
            | LedgerError::NoteTooLong(_)
            | LedgerError::InvalidBuyer
            | LedgerError::BuyerIsSeller
            | LedgerError::InvalidHash
            | LedgerError::InvalidPrice
            | LedgerError::ExpiryTooSoon
            | LedgerError::ExpiryTooFar => "Validation",
            LedgerError::NotOwner | LedgerError::NotBuyer | LedgerError::NotAuthorized => {
                "Authorization"
            }
            LedgerError::UnknownToken(_)
            | LedgerError::Frozen
            | LedgerError::AlreadyFrozen
            | LedgerError::InEscrow
            | LedgerError::NotInEscrow(_)
            | LedgerError::Expired
            | LedgerError::RefundNotYet => "State",
            LedgerError::BadSecret => "Cryptographic",
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for LedgerError {}
