use thiserror::Error;

/// Per-event failures raised while turning a raw feed event into a record.
/// None of these ever escape the envelope loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("event has neither current_train_id nor train_id")]
    MissingTrainId,
    #[error("train id {0:?} is too short to carry a headcode and speed flag")]
    MalformedTrainId(String),
    #[error("{type_code} event is missing required field {field}")]
    MissingField {
        field: &'static str,
        type_code: String,
    },
    #[error("{type_code} event has a malformed {field} field")]
    MalformedField {
        field: &'static str,
        type_code: String,
    },
    #[error("feed event is not a header/body object: {0}")]
    MalformedEvent(String),
}

impl NormalizeError {
    /// Short, stable name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeError::MissingTrainId => "missing_train_id",
            NormalizeError::MalformedTrainId(_) => "malformed_train_id",
            NormalizeError::MissingField { .. } => "missing_field",
            NormalizeError::MalformedField { .. } => "malformed_field",
            NormalizeError::MalformedEvent(_) => "malformed_event",
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error talking to the broker: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for the broker")]
    Timeout,
    #[error("broker rejected the request: {0}")]
    Rejected(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("transport is not connected")]
    NotConnected,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write batch file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("object store write failed: {0}")]
    ObjectStore(String),
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to read operator table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse operator table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that stop the consumer. Only exhaustion of the connect ceiling gets here at runtime.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("connection attempts exhausted after {attempts} tries")]
    ConnectAttemptsExhausted { attempts: u32 },
    #[error("consumer has failed and will not reconnect")]
    AlreadyFailed,
}
