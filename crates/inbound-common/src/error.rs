//! Error types for inbound

use thiserror::Error;

/// Result type alias for inbound operations
pub type Result<T> = std::result::Result<T, InboundError>;

/// Main error type for inbound
#[derive(Error, Debug)]
pub enum InboundError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported type: no mapping registered for '{source_type}'")]
    UnsupportedType { source_type: String },

    #[error("Invalid column name: {0}")]
    InvalidColumnName(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Job error: {0}")]
    Job(String),
}

impl InboundError {
    /// Bad credentials, as opposed to a generic I/O failure
    pub fn is_authentication(&self) -> bool {
        matches!(self, InboundError::Authentication(_))
    }

    /// Errors that stem from how a job was set up rather than from I/O.
    ///
    /// These fail fast and are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            InboundError::InvalidArgument(_)
                | InboundError::UnsupportedType { .. }
                | InboundError::InvalidColumnName(_)
                | InboundError::Template(_)
                | InboundError::Config(_)
        )
    }
}
