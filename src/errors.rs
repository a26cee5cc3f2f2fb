//! # Error Types Module
//!
//! Structured error types for the collaborators the funnel talks to: the
//! messaging transport, the lead ledger, the document dispatcher and the
//! startup configuration.

/// Errors reported by the messaging transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The request reached the API and was rejected
    Api(String),
    /// The API could not be reached
    Network(String),
    /// The request could not be built (bad recipient, bad URL, ...)
    InvalidRequest(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Api(msg) => write!(f, "Transport API error: {msg}"),
            TransportError::Network(msg) => write!(f, "Transport network error: {msg}"),
            TransportError::InvalidRequest(msg) => write!(f, "Invalid transport request: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors reported by a lead store backend
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// The store could not be reached or rejected the request
    Transport(String),
    /// The store answered with data we could not interpret
    Decode(String),
    /// A row reference did not match any stored row
    UnknownRow(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Transport(msg) => write!(f, "Ledger transport error: {msg}"),
            LedgerError::Decode(msg) => write!(f, "Ledger decode error: {msg}"),
            LedgerError::UnknownRow(row) => write!(f, "Ledger row not found: {row}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                LedgerError::Decode(err.to_string())
            }
            other => LedgerError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LedgerError::Decode(err.to_string())
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

/// Errors reported by the document dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Neither a file reference nor a local path is configured
    NoSource,
    /// Every configured source failed; each cause is kept for the operator
    Exhausted(Vec<String>),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NoSource => write!(f, "No document source configured"),
            DispatchError::Exhausted(causes) => {
                write!(f, "Document delivery failed: {}", causes.join("; "))
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Startup configuration errors; these are fatal
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required variable is absent or blank
    Missing(&'static str),
    /// A variable is present but cannot be parsed
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{key} must be set"),
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "{key}={value:?} is invalid: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
