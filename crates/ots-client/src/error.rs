//! Error taxonomy for the API client.
//!
//! Every client operation returns [`OtsError`]. [`OtsError::kind`] reduces an
//! error to a copyable [`ErrorKind`], which is what the retry policy reasons
//! about, and [`ErrorResponse`] is the serializable shape handed to the UI.
//!
//! No variant ever carries an API token, a passphrase or a secret value.

use std::collections::BTreeMap;
use std::time::Duration;

use ots_vault::{CryptoError, VaultError};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Failure classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure: the request never left the client.
    Connect,
    /// Any other failure where no response was received.
    Transport,
    /// The per-attempt timeout fired.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 503.
    ServiceUnavailable,
    /// Any other 5xx.
    ServerError,
    /// Any other non-auth, non-validation 4xx.
    ClientError,
    /// HTTP 401/403.
    Auth,
    /// HTTP 422 or a local pre-flight check.
    Validation,
    /// The response body did not match the expected shape.
    Serialization,
    /// The server certificate did not match a configured pin.
    Certificate,
    Storage,
    Crypto,
    Config,
    Cancelled,
}

impl ErrorKind {
    /// Every kind, for table-driven checks.
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::Connect,
        ErrorKind::Transport,
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::ServiceUnavailable,
        ErrorKind::ServerError,
        ErrorKind::ClientError,
        ErrorKind::Auth,
        ErrorKind::Validation,
        ErrorKind::Serialization,
        ErrorKind::Certificate,
        ErrorKind::Storage,
        ErrorKind::Crypto,
        ErrorKind::Config,
        ErrorKind::Cancelled,
    ];

    /// Connection-level failure with no observable response.
    pub fn is_connectivity(self) -> bool {
        matches!(self, ErrorKind::Connect | ErrorKind::Transport)
    }
}

// ---------------------------------------------------------------------------
// OtsError
// ---------------------------------------------------------------------------

/// Unified error type for the One-Time Secret client.
#[derive(Debug, thiserror::Error)]
pub enum OtsError {
    /// No response was received (connect failure, timeout, broken
    /// connection, certificate pin mismatch).
    #[error("network error: {message}")]
    Network { kind: ErrorKind, message: String },

    /// The server answered with an application-level failure.
    #[error("api error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Raw response body, if any.
        body: Option<String>,
        /// Parsed `Retry-After`, honoured on 503.
        retry_after: Option<Duration>,
    },

    /// HTTP 429.
    #[error("rate limit exceeded, please wait before trying again")]
    RateLimited {
        retry_after: Option<Duration>,
        body: Option<String>,
    },

    /// HTTP 401 or 403.
    #[error("authentication failed: {message}")]
    Auth { status: u16, message: String },

    /// HTTP 422 or a local pre-flight check. `fields` maps a field name to
    /// its message.
    #[error("invalid input: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, String>,
    },

    /// The response body did not match the expected schema.
    #[error("unexpected response: {message}")]
    Serialization { message: String },

    /// Vault I/O or not-initialized. Crypto failures inside the vault stay
    /// reachable through the error source.
    #[error("{0}")]
    Storage(#[from] VaultError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed client configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl OtsError {
    pub fn network(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// A single-field local validation failure.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), message.clone());
        Self::Validation { message, fields }
    }

    /// Classification used by the retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { kind, .. } => *kind,
            Self::Api { status: 503, .. } => ErrorKind::ServiceUnavailable,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::ServerError,
            Self::Api { .. } => ErrorKind::ClientError,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Stable machine-readable code for the UI shell.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network {
                kind: ErrorKind::Timeout,
                ..
            } => "REQUEST_TIMEOUT",
            Self::Network {
                kind: ErrorKind::Certificate,
                ..
            } => "CERTIFICATE_ERROR",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Api { status: 404, .. } => "NOT_FOUND",
            Self::Api { status: 503, .. } => "SERVICE_UNAVAILABLE",
            Self::Api { .. } => "API_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Auth { .. } => "AUTH_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Auth { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } | Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, OtsError>;

// ---------------------------------------------------------------------------
// ErrorResponse
// ---------------------------------------------------------------------------

/// Serializable error shape handed to the UI shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl From<&OtsError> for ErrorResponse {
    fn from(err: &OtsError) -> Self {
        let fields = match err {
            OtsError::Validation { fields, .. } => fields.clone(),
            _ => BTreeMap::new(),
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            status: err.status(),
            fields,
        }
    }
}

impl From<OtsError> for ErrorResponse {
    fn from(err: OtsError) -> Self {
        Self::from(&err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
