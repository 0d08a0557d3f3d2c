//! High-level network and application errors.

use crate::chain::error::ObserverError;
use crate::coordinator::error::CoordinatorError;
use crate::ledger::error::LedgerError;
use crate::protocol::error::ProtocolError;

/// Includes all network-related errors.
#[derive(Debug)]
pub enum NetError {
    /// Socket or filesystem IO failure.
    IO(std::io::Error),
    /// The peer closed the stream mid-message.
    ReachedEOF,
    /// The connection timed out.
    ConnectionTimedOut,
    /// Message framing or CBOR decoding failed.
    Cbor(serde_cbor::Error),
}

/// Enum to handle application related errors at the binary level.
#[derive(Debug)]
pub enum AppError {
    /// Coordinator failures.
    Coordinator(CoordinatorError),
    /// Chain observer failures.
    Observer(ObserverError),
    /// Asset ledger failures.
    Ledger(LedgerError),
    /// Hashlock/timelock/script failures.
    Protocol(ProtocolError),
    /// Network failures on the admin RPC.
    Net(NetError),
}

impl From<std::io::Error> for NetError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_cbor::Error> for NetError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}

impl From<CoordinatorError> for AppError {
    fn from(value: CoordinatorError) -> Self {
        AppError::Coordinator(value)
    }
}

impl From<ObserverError> for AppError {
    fn from(value: ObserverError) -> Self {
        AppError::Observer(value)
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        AppError::Ledger(value)
    }
}

impl From<ProtocolError> for AppError {
    fn from(value: ProtocolError) -> Self {
        AppError::Protocol(value)
    }
}

impl From<NetError> for AppError {
    fn from(value: NetError) -> Self {
        AppError::Net(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Net(NetError::IO(value))
    }
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Coordinator(e) => write!(f, "{e}"),
            AppError::Observer(e) => write!(f, "{e}"),
            AppError::Ledger(e) => write!(f, "{e}"),
            AppError::Protocol(e) => write!(f, "{e}"),
            AppError::Net(e) => write!(f, "{e}"),
        }
    }
}
