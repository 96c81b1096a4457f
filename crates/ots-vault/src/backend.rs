//! Store abstraction and backend selection.
//!
//! Consumers hold an `Arc<dyn SecureStore>` and never need to know whether
//! entries live in the OS keychain or in the software [`Vault`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::Result;
use crate::keychain::{self, KeychainProvider, KeychainStore};
use crate::store::{VAULT_FILE_NAME, Vault};

/// Async key-value interface shared by every secure storage backend.
///
/// Every operation other than `initialize` fails with
/// [`VaultError::NotInitialized`](crate::VaultError::NotInitialized) until
/// `initialize` has succeeded.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;

    /// Unlock the store. Must be called once before any other operation.
    async fn initialize(&self, password: &str) -> Result<()>;

    /// Value for `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; idempotent.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry; idempotent.
    async fn clear(&self) -> Result<()>;

    /// Whether `key` is present.
    async fn has(&self, key: &str) -> Result<bool>;
}

#[async_trait]
impl SecureStore for Vault {
    fn backend_name(&self) -> &'static str {
        "software-aead"
    }

    async fn initialize(&self, password: &str) -> Result<()> {
        Vault::initialize(self, password).await
    }

    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Vault::get(self, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        Vault::set(self, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        Vault::remove(self, key).await
    }

    async fn clear(&self) -> Result<()> {
        Vault::clear(self).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Vault::has(self, key).await
    }
}

/// Options for [`open_secure_store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding the software vault file.
    pub data_dir: PathBuf,
    /// Use the OS keychain when the platform offers a usable one.
    pub prefer_os_keychain: bool,
    /// PBKDF2 iterations for a newly created software vault.
    pub iterations: u32,
}

impl StoreOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            prefer_os_keychain: false,
            iterations: crypto::DEFAULT_ITERATIONS,
        }
    }

    pub fn with_os_keychain(mut self, prefer: bool) -> Self {
        self.prefer_os_keychain = prefer;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Pick the best backend for this platform.
pub fn open_secure_store(options: &StoreOptions) -> Arc<dyn SecureStore> {
    select_store(options, keychain::platform_keychain())
}

/// Pick a backend given an optional keychain `provider`.
///
/// The keychain wins only when it is preferred and passes its capability
/// check; otherwise the software vault under `data_dir` is used.
pub fn select_store(
    options: &StoreOptions,
    provider: Option<Arc<dyn KeychainProvider>>,
) -> Arc<dyn SecureStore> {
    if options.prefer_os_keychain {
        match provider {
            Some(provider) if provider.is_available() => {
                tracing::info!("using OS keychain for secure storage");
                return Arc::new(KeychainStore::new(provider));
            }
            Some(_) => tracing::warn!("OS keychain unavailable, falling back to software vault"),
            None => tracing::debug!("no OS keychain on this platform"),
        }
    }

    let path = options.data_dir.join(VAULT_FILE_NAME);
    tracing::info!(path = %path.display(), "using software vault for secure storage");
    Arc::new(Vault::with_iterations(path, options.iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::tests::MemoryKeychain;

    fn options(dir: &tempfile::TempDir) -> StoreOptions {
        StoreOptions::new(dir.path()).with_iterations(crypto::MIN_ITERATIONS)
    }

    #[test]
    fn software_vault_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = select_store(&options(&dir), Some(Arc::new(MemoryKeychain::default())));
        assert_eq!(store.backend_name(), "software-aead");
    }

    #[test]
    fn keychain_when_preferred_and_available() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir).with_os_keychain(true);
        let store = select_store(&opts, Some(Arc::new(MemoryKeychain::default())));
        assert_eq!(store.backend_name(), "os-keychain");
    }

    #[test]
    fn falls_back_when_keychain_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&dir).with_os_keychain(true);
        let provider = MemoryKeychain {
            unavailable: true,
            ..Default::default()
        };
        let store = select_store(&opts, Some(Arc::new(provider)));
        assert_eq!(store.backend_name(), "software-aead");

        let store = select_store(&opts, None);
        assert_eq!(store.backend_name(), "software-aead");
    }

    #[tokio::test]
    async fn vault_through_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = select_store(&options(&dir), None);
        store.initialize("pw").await.unwrap();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().as_str(), "v");
        store.clear().await.unwrap();
        assert!(!store.has("k").await.unwrap());
    }
}
