//! Encrypted local storage for One-Time Secret credentials.
//!
//! Values are encrypted at rest with AES-256-GCM under a key derived from the
//! user's password (PBKDF2-HMAC-SHA256). Where the platform offers a usable
//! keychain, it can be used instead of the software vault.
//!
//! # Modules
//!
//! - [`crypto`]: key derivation and AEAD primitives.
//! - [`store`]: the file-backed software [`Vault`].
//! - [`keychain`]: OS keychain providers and [`KeychainStore`].
//! - [`backend`]: the [`SecureStore`] trait and backend selection.
//! - [`error`]: error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ots_vault::{StoreOptions, open_secure_store};
//!
//! # async fn example() -> ots_vault::Result<()> {
//! let store = open_secure_store(&StoreOptions::new("data"));
//! store.initialize("correct horse battery staple").await?;
//!
//! store.set("api_token", "tok-123").await?;
//! assert!(store.has("api_token").await?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod crypto;
pub mod error;
pub mod keychain;
pub mod store;

pub use backend::{SecureStore, StoreOptions, open_secure_store, select_store};
pub use crypto::VaultKey;
pub use error::{CryptoError, Result, VaultError};
pub use keychain::{KeychainProvider, KeychainStore, platform_keychain};
pub use store::{VAULT_FILE_NAME, Vault, VaultEntry};
