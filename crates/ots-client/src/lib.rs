//! Resilient client for the One-Time Secret API.
//!
//! The client attaches credentials read from an [`ots_vault::SecureStore`]
//! at call time, retries transient failures with exponential backoff and
//! jitter, validates response bodies, and reports every failure through a
//! single error taxonomy.
//!
//! # Modules
//!
//! - [`client`]: [`ApiClient`] and its execution loop.
//! - [`credentials`]: [`CredentialManager`] and the stored [`Credentials`].
//! - [`retry`]: the pure [`RetryPolicy`].
//! - [`pipeline`]: request preparation stages.
//! - [`transport`]: the [`HttpTransport`] seam and its `reqwest` implementation.
//! - [`pinning`]: optional certificate pinning.
//! - [`config`]: [`ClientConfig`].
//! - [`types`]: request and response types.
//! - [`error`]: [`OtsError`], [`ErrorKind`], [`ErrorResponse`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ots_client::{ApiClient, ClientConfig, CreateSecretRequest};
//! use ots_vault::{StoreOptions, open_secure_store};
//!
//! # async fn example() -> ots_client::Result<()> {
//! let store = open_secure_store(&StoreOptions::new(".ots"));
//! store.initialize("vault password").await?;
//!
//! let client = ApiClient::new(ClientConfig::from_env()?, store)?;
//! let meta = client
//!     .create_secret(&CreateSecretRequest::new("hello").with_ttl(3600))
//!     .await?;
//! println!("{}", client.secret_link(&meta.secret_key)?);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pinning;
pub mod pipeline;
pub mod retry;
pub mod transport;
pub mod types;

pub use cancel::CancelToken;
pub use client::ApiClient;
pub use config::ClientConfig;
pub use credentials::{CredentialManager, Credentials};
pub use error::{ErrorKind, ErrorResponse, OtsError, Result};
pub use pinning::{CertificateVerifier, NoopVerifier, PinnedCertificates};
pub use retry::{Idempotency, RetryConfig, RetryDecision, RetryPolicy, RetryState};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{
    CreateSecretRequest, SecretMetadata, SecretState, SecretValue, ServiceStatus, TTL_PRESETS,
};
