use thiserror::Error;

/// Errors surfaced by a [`crate::Store`] implementation.
///
/// Backends work with `anyhow` internally and convert at the trait boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    /// The data changed underneath a conditional write, which was not applied.
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
