//! Vault error types.
//!
//! Two layers of errors are surfaced by this crate:
//!
//! - [`CryptoError`]: failures of the key derivation / AEAD primitives in
//!   [`crate::crypto`]. Decryption failures are deliberately collapsed into a
//!   single variant so callers cannot tell a wrong key from a tampered
//!   ciphertext.
//! - [`VaultError`]: storage-level failures returned by every store backend.
//!   A crypto failure inside a store operation is wrapped in
//!   [`VaultError::Crypto`] with the original [`CryptoError`] kept as the
//!   error source.
//!
//! No variant ever carries key material or decrypted values.

/// Failure of a cryptographic primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key derivation failed (bad parameters, primitive unavailable).
    #[error("key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    /// Encryption failed (invalid key length, sealing error).
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Decryption failed. Covers a wrong key, a corrupted or truncated
    /// ciphertext, a mismatched nonce and a tag mismatch alike.
    #[error("decryption failed")]
    Decryption,

    /// The system CSPRNG could not produce random bytes.
    #[error("secure random source unavailable")]
    RandomSource,
}

/// Unified error type for every vault backend.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Lifecycle ----------------------------------------------------------
    /// An operation was attempted before `initialize` succeeded.
    #[error("storage error: not initialized")]
    NotInitialized,

    /// Entry keys must be non-empty.
    #[error("storage error: invalid entry key")]
    InvalidKey,

    // -- Crypto -------------------------------------------------------------
    /// A crypto primitive failed while serving a storage operation.
    #[error("storage error: {context}")]
    Crypto {
        /// What the vault was doing, e.g. "failed to decrypt entry `token`".
        context: String,
        #[source]
        source: CryptoError,
    },

    // -- Persistence --------------------------------------------------------
    /// The vault file exists but does not have the expected shape.
    #[error("storage error: vault file is corrupt: {reason}")]
    Corrupt { reason: String },

    /// The OS keychain backend rejected or could not serve a request.
    #[error("storage error: keychain unavailable: {reason}")]
    Keychain { reason: String },

    /// I/O error from the filesystem.
    #[error("storage error: io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("storage error: serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors (e.g. a panicked write task).
    #[error("storage error: internal: {0}")]
    Internal(String),
}

impl VaultError {
    /// Wrap a [`CryptoError`] with storage context.
    pub fn crypto(context: impl Into<String>, source: CryptoError) -> Self {
        Self::Crypto {
            context: context.into(),
            source,
        }
    }

    /// The underlying crypto failure, if this error was caused by one.
    pub fn crypto_cause(&self) -> Option<&CryptoError> {
        match self {
            Self::Crypto { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn not_initialized_message() {
        assert_eq!(
            VaultError::NotInitialized.to_string(),
            "storage error: not initialized"
        );
    }

    #[test]
    fn crypto_wrapping_keeps_source() {
        let err = VaultError::crypto("failed to decrypt entry `a`", CryptoError::Decryption);
        assert_eq!(err.to_string(), "storage error: failed to decrypt entry `a`");
        assert_eq!(err.crypto_cause(), Some(&CryptoError::Decryption));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("decryption failed"));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
        assert_send_sync::<CryptoError>();
    }
}
