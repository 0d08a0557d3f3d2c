//! All hashlock, timelock and script related errors.

/// Represents errors encountered while handling hashlocks, timelocks and the
/// Bitcoin HTLC script.
///
/// These are surfaced to the caller immediately and never retried: a malformed
/// hex string or an inconsistent timelock pair cannot become valid later.
#[derive(Debug)]
pub enum ProtocolError {
    /// A hex field is not a 32-byte lowercase hex string.
    MalformedHex {
        /// The field being parsed.
        field: &'static str,
        /// Length of the offending input after normalization.
        got_len: usize,
    },
    /// The system RNG failed to produce entropy.
    RngFailure,
    /// Asset-leg deadline is not in the future.
    DeadlineInPast {
        /// Requested asset-leg deadline.
        t_asset: u64,
        /// Clock reading used for validation.
        now: u64,
    },
    /// Safety buffer outside the accepted `[1h, 24h]` range.
    BufferOutOfRange {
        /// Requested buffer in hours.
        hours: u64,
    },
    /// The computed BTC-leg locktime is not representable as an absolute
    /// locktime.
    InvalidLockTime(bitcoin::absolute::ConversionError),
    /// Error in Bitcoin script handling.
    Script(bitcoin::blockdata::script::Error),
    /// Error converting from a byte slice to a hash type.
    Hash(bitcoin::hashes::FromSliceError),
    /// General error not covered by other variants.
    General(&'static str),
}

impl From<bitcoin::absolute::ConversionError> for ProtocolError {
    fn from(value: bitcoin::absolute::ConversionError) -> Self {
        Self::InvalidLockTime(value)
    }
}

impl From<bitcoin::blockdata::script::Error> for ProtocolError {
    fn from(value: bitcoin::blockdata::script::Error) -> Self {
        Self::Script(value)
    }
}

impl From<bitcoin::hashes::FromSliceError> for ProtocolError {
    fn from(value: bitcoin::hashes::FromSliceError) -> Self {
        Self::Hash(value)
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MalformedHex { field, got_len } => {
                write!(
                    f,
                    "Malformed hex in {field}: expected 64 digits, got {got_len}"
                )
            }
            ProtocolError::RngFailure => write!(f, "System RNG failed to produce entropy"),
            ProtocolError::DeadlineInPast { t_asset, now } => {
                write!(f, "Asset deadline {t_asset} is not after current time {now}")
            }
            ProtocolError::BufferOutOfRange { hours } => {
                write!(f, "Timelock buffer {hours}h outside accepted range [1h, 24h]")
            }
            ProtocolError::InvalidLockTime(e) => write!(f, "Invalid locktime: {e}"),
            ProtocolError::Script(e) => write!(f, "Script error: {e}"),
            ProtocolError::Hash(e) => write!(f, "Hash conversion error: {e}"),
            ProtocolError::General(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::InvalidLockTime(e) => Some(e),
            ProtocolError::Script(e) => Some(e),
            ProtocolError::Hash(e) => Some(e),
            _ => None,
        }
    }
}
