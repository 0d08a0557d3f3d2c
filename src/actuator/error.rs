//! All actuator related errors.

use crate::ledger::error::LedgerError;

/// Errors surfaced by ledger submissions.
///
/// Retry is always the coordinator's decision: the actuator reports one
/// attempt's outcome and stops.
#[derive(Debug)]
pub enum ActuatorError {
    /// The submission did not complete within the per-attempt timeout.
    Timeout,
    /// The ledger rejected the operation; deterministic, never retried.
    LedgerRejected(LedgerError),
    /// The ledger accepted the operation but the emitted events could not be
    /// decoded into the expected post-state.
    ParseFailure(&'static str),
    /// Transport failure talking to the ledger; retryable.
    Transport(String),
}

impl ActuatorError {
    /// Whether the coordinator's backoff policy applies. Only external
    /// failures qualify; validation, authorization, state and parse errors
    /// are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActuatorError::Timeout | ActuatorError::Transport(_))
    }
}

impl From<LedgerError> for ActuatorError {
    fn from(value: LedgerError) -> Self {
        ActuatorError::LedgerRejected(value)
    }
}

impl std::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuatorError::Timeout => write!(f, "Ledger submission timed out"),
            ActuatorError::LedgerRejected(e) => write!(f, "Ledger rejected operation: {e}"),
            ActuatorError::ParseFailure(what) => write!(f, "Failed to parse ledger events: {what}"),
            ActuatorError::Transport(e) => write!(f, "Ledger transport failure: {e}"),
        }
    }
}

impl std::error::Error for ActuatorError {}
