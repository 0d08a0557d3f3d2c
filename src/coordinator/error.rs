//! All coordinator related errors.

use crate::{actuator::error::ActuatorError, error::NetError, protocol::error::ProtocolError};

/// Represents errors that can occur during coordinator operations.
#[derive(Debug)]
pub enum CoordinatorError {
    /// A swap with this hash is already registered and not yet retired.
    DuplicateHash,
    /// No swap matches the given hash or token.
    UnknownSwap,
    /// The swap is in a state that does not allow the requested operation.
    WrongState(&'static str),
    /// Registration parameters failed validation.
    Protocol(ProtocolError),
    /// A ledger submission failed.
    Actuator(ActuatorError),
    /// Standard IO errors during file operations.
    IO(std::io::Error),
    /// Network-related errors on the admin RPC.
    Net(NetError),
    /// The coordinator actor is gone; the request cannot be served.
    ActorGone,
    /// Threading error when a mutex is poisoned due to a thread panic.
    MutexPoison,
    /// Static string describing a general error condition.
    General(&'static str),
}

impl From<ProtocolError> for CoordinatorError {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl From<ActuatorError> for CoordinatorError {
    fn from(value: ActuatorError) -> Self {
        Self::Actuator(value)
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<NetError> for CoordinatorError {
    fn from(value: NetError) -> Self {
        Self::Net(value)
    }
}

impl From<serde_cbor::Error> for CoordinatorError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Net(NetError::Cbor(value))
    }
}

impl<T> From<std::sync::PoisonError<T>> for CoordinatorError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::MutexPoison
    }
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::DuplicateHash => {
                write!(f, "A swap with this hash is already registered")
            }
            CoordinatorError::UnknownSwap => write!(f, "No such swap"),
            CoordinatorError::WrongState(state) => {
                write!(f, "Operation not allowed in state {state}")
            }
            CoordinatorError::Protocol(e) => write!(f, "Invalid swap parameters: {e}"),
            CoordinatorError::Actuator(e) => write!(f, "Ledger actuator failure: {e}"),
            CoordinatorError::IO(e) => write!(f, "IO error: {e}"),
            CoordinatorError::Net(e) => write!(f, "Network error: {e}"),
            CoordinatorError::ActorGone => write!(f, "Coordinator is shut down"),
            CoordinatorError::MutexPoison => write!(f, "Poisoned lock"),
            CoordinatorError::General(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}
