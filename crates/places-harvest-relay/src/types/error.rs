//! Error types for the relay.

/// All errors that can occur in the relay service.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Harvest error: {0}")]
    Harvest(#[from] places_harvest::HarvestError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Query file error: {0}")]
    Query(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Delivery queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a batch could not be delivered to the collector.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
