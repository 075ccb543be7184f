//! Error types for the reconciliation engine.

/// Top-level error type for one reconciliation step.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Transport-level failure talking to the remote API.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote API answered with a non-success status.
    #[error("remote {operation} failed ({status}): {body}")]
    Remote {
        /// Short operation name, e.g. `get_member`.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// An entity is missing a field it needs for this step.
    #[error("{entity} is missing {field}")]
    MissingField {
        /// Entity description, e.g. `scheduled event 123`.
        entity: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A remote value fell outside the set this bot understands.
    #[error("unexpected {kind} value: {value}")]
    UnexpectedValue {
        /// What kind of value was being decoded.
        kind: &'static str,
        /// The raw value.
        value: String,
    },

    /// Guild data store error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was interrupted by shutdown.
    #[error("cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Returns `true` for errors that mean an upstream schema assumption broke.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::UnexpectedValue { .. })
    }

    /// Returns `true` for errors the next tick is expected to retry naturally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Remote { .. })
    }
}

impl From<reqwest::Error> for ReconcileError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReconcileError>;
