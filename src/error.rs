use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    /// A call to the commerce backend, the geocoder or the messenger failed.
    #[error("{service} call failed: {reason}")]
    ExternalCall {
        service: &'static str,
        reason: String,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invoice payload does not match the issued correlation token")]
    PaymentTokenMismatch,
    #[error("Service point directory is empty")]
    NoServicePoints,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
}

impl BotError {
    pub fn external(service: &'static str, reason: impl Into<String>) -> Self {
        Self::ExternalCall {
            service,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
