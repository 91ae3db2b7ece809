/// Error types shared across the download pipeline
use bluer::Uuid;
use thiserror::Error;

/// Failures talking to the gadget over GATT
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid gadget address '{0}'")]
    InvalidAddress(String),

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("gadget {0} not found within discovery timeout")]
    DeviceNotFound(String),

    #[error("characteristic {0} not found on gadget")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic {uuid} returned {len} bytes, expected {expected}")]
    UnexpectedLength {
        uuid: Uuid,
        len: usize,
        expected: usize,
    },

    #[error("characteristic {uuid} returned implausible value {value}")]
    UnexpectedValue { uuid: Uuid, value: u64 },

    #[error("session already closed")]
    Closed,
}

/// A notification payload that does not match the log record layout
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload of {0} bytes")]
    MalformedPayload(usize),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cursor file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor file contains '{0}', not an integer")]
    Parse(String),

    #[error("cursor file task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Anything that aborts a single download cycle
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),
}
