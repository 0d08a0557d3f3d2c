//! Bitcoin-observer related errors.

/// Errors that can occur within the chain observer components.
#[derive(Debug)]
pub enum ObserverError {
    /// Non-2xx response from the chain API.
    HttpStatus {
        /// HTTP status code returned.
        status: i32,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Transport-level HTTP failure.
    Http(minreq::Error),
    /// Response body failed to parse.
    ParsingError,
    /// JSON decoding error from the chain API.
    Json(serde_json::Error),
    /// I/O error surfaced from filesystem or sockets.
    IOError(std::io::Error),
    /// Serialization/deserialization error for the CBOR registry.
    SerdeCbor(serde_cbor::Error),
    /// WebSocket error from tungstenite.
    WebSocket(tungstenite::Error),
    /// Channel send failed; the receiving side is gone.
    SendError,
    /// Represents a mutex poisoning error.
    MutexPoison,
    /// Represents a general error with a descriptive message.
    General(String),
}

impl From<minreq::Error> for ObserverError {
    fn from(value: minreq::Error) -> Self {
        ObserverError::Http(value)
    }
}

impl From<serde_json::Error> for ObserverError {
    fn from(value: serde_json::Error) -> Self {
        ObserverError::Json(value)
    }
}

impl From<std::io::Error> for ObserverError {
    fn from(value: std::io::Error) -> Self {
        ObserverError::IOError(value)
    }
}

impl From<serde_cbor::Error> for ObserverError {
    fn from(value: serde_cbor::Error) -> Self {
        ObserverError::SerdeCbor(value)
    }
}

impl From<tungstenite::Error> for ObserverError {
    fn from(value: tungstenite::Error) -> Self {
        ObserverError::WebSocket(value)
    }
}

impl<T> From<std::sync::PoisonError<T>> for ObserverError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::MutexPoison
    }
}

impl std::fmt::Display for ObserverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl ObserverError {
    /// Returns a stable string identifier for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ObserverError::HttpStatus { .. } => "HttpStatus",
            ObserverError::Http(_) => "Http",
            ObserverError::ParsingError => "ParsingError",
            ObserverError::Json(_) => "Json",
            ObserverError::IOError(_) => "IOError",
            ObserverError::SerdeCbor(_) => "SerdeCbor",
            ObserverError::WebSocket(_) => "WebSocket",
            ObserverError::SendError => "SendError",
            ObserverError::MutexPoison => "MutexPoison",
            ObserverError::General(_) => "General",
        }
    }
}
