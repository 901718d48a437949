use std::io;

/// Errors raised by the bus and its transports
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport closed")]
    Closed,
}

pub type BusResult<T> = Result<T, BusError>;
