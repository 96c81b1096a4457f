//! OS keychain integration.
//!
//! The [`KeychainProvider`] trait abstracts over platform secure storage that
//! holds small named items:
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Other platforms**: no provider; callers fall back to the software
//!   [`Vault`](crate::Vault)
//!
//! [`KeychainStore`] adapts a provider to the [`SecureStore`] interface. The
//! OS protects the items itself, so the password passed to `initialize` is
//! not used for encryption here.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use zeroize::{Zeroize, Zeroizing};

use crate::backend::SecureStore;
use crate::error::{Result, VaultError};

/// Name of the item that lists every key written through a [`KeychainStore`].
const INDEX_ITEM: &str = "__ots_index__";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure item storage.
///
/// Implementations must be `Send + Sync` so stores can be shared across
/// async tasks.
pub trait KeychainProvider: Send + Sync {
    /// Capability check: can this backend be used right now?
    fn is_available(&self) -> bool;

    /// Read the item stored under `account`, if any.
    fn get_item(&self, account: &str) -> Result<Option<Vec<u8>>>;

    /// Store (or overwrite) the item under `account`.
    fn set_item(&self, account: &str, data: &[u8]) -> Result<()>;

    /// Delete the item under `account`. Deleting a missing item is a no-op.
    fn delete_item(&self, account: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// The Security framework error code for "item not found"
/// (`errSecItemNotFound = -25300`).
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// macOS Keychain Services provider using generic password items.
#[cfg(target_os = "macos")]
pub struct MacOSKeychain {
    service_name: String,
}

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    /// Default service name used for keychain entries.
    const DEFAULT_SERVICE: &'static str = "com.onetimesecret.desktop";

    pub fn new() -> Self {
        Self::with_service(Self::DEFAULT_SERVICE)
    }

    /// Use a custom service name, e.g. to isolate test runs.
    pub fn with_service(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for MacOSKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
impl KeychainProvider for MacOSKeychain {
    fn is_available(&self) -> bool {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, INDEX_ITEM) {
            Ok(_) => true,
            Err(e) => e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND,
        }
    }

    fn get_item(&self, account: &str) -> Result<Option<Vec<u8>>> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(&self.service_name, account) {
            Ok(data) => Ok(Some(data.to_vec())),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(VaultError::Keychain {
                reason: format!("macOS keychain read failed: {e}"),
            }),
        }
    }

    fn set_item(&self, account: &str, data: &[u8]) -> Result<()> {
        use security_framework::passwords::set_generic_password;

        set_generic_password(&self.service_name, account, data).map_err(|e| {
            VaultError::Keychain {
                reason: format!("macOS keychain write failed: {e}"),
            }
        })
    }

    fn delete_item(&self, account: &str) -> Result<()> {
        use security_framework::passwords::delete_generic_password;

        match delete_generic_password(&self.service_name, account) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(VaultError::Keychain {
                reason: format!("macOS keychain delete failed: {e}"),
            }),
        }
    }
}

/// Returns the OS keychain provider for the current platform, if there is one.
pub fn platform_keychain() -> Option<Arc<dyn KeychainProvider>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(MacOSKeychain::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}

// ---------------------------------------------------------------------------
// KeychainStore
// ---------------------------------------------------------------------------

/// [`SecureStore`] backed by a [`KeychainProvider`].
///
/// Keeps an index item so that [`clear`](SecureStore::clear) can find every
/// entry it wrote.
pub struct KeychainStore {
    provider: Arc<dyn KeychainProvider>,
    index: Mutex<Option<BTreeSet<String>>>,
}

impl KeychainStore {
    pub fn new(provider: Arc<dyn KeychainProvider>) -> Self {
        Self {
            provider,
            index: Mutex::new(None),
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if key.is_empty() || key == INDEX_ITEM {
            return Err(VaultError::InvalidKey);
        }
        Ok(())
    }

    /// Run a provider call on the blocking pool. Keychain APIs block on IPC
    /// with the OS security daemon.
    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&dyn KeychainProvider) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        tokio::task::spawn_blocking(move || call(provider.as_ref()))
            .await
            .map_err(|e| VaultError::Internal(format!("keychain task failed: {e}")))?
    }

    async fn load_index(&self) -> Result<BTreeSet<String>> {
        match self.blocking(|p| p.get_item(INDEX_ITEM)).await? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|e| VaultError::Corrupt {
                reason: format!("keychain index: {e}"),
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn save_index(&self, index: &BTreeSet<String>) -> Result<()> {
        let raw = serde_json::to_vec(index)?;
        self.blocking(move |p| p.set_item(INDEX_ITEM, &raw)).await
    }
}

#[async_trait]
impl SecureStore for KeychainStore {
    fn backend_name(&self) -> &'static str {
        "os-keychain"
    }

    async fn initialize(&self, _password: &str) -> Result<()> {
        let index = self.load_index().await?;
        tracing::info!(entries = index.len(), "opened keychain store");
        *self.index.lock().await = Some(index);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        Self::check_key(key)?;
        let index = self.index.lock().await;
        if index.is_none() {
            return Err(VaultError::NotInitialized);
        }

        let account = key.to_string();
        let Some(raw) = self.blocking(move |p| p.get_item(&account)).await? else {
            return Ok(None);
        };
        match String::from_utf8(raw) {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(VaultError::Corrupt {
                    reason: format!("keychain item `{key}` is not valid UTF-8"),
                })
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::check_key(key)?;
        let mut guard = self.index.lock().await;
        let index = guard.as_mut().ok_or(VaultError::NotInitialized)?;

        let account = key.to_string();
        let data = Zeroizing::new(value.as_bytes().to_vec());
        self.blocking(move |p| p.set_item(&account, &data)).await?;
        if index.insert(key.to_string()) {
            self.save_index(index).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        Self::check_key(key)?;
        let mut guard = self.index.lock().await;
        let index = guard.as_mut().ok_or(VaultError::NotInitialized)?;

        let account = key.to_string();
        self.blocking(move |p| p.delete_item(&account)).await?;
        if index.remove(key) {
            self.save_index(index).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.index.lock().await;
        let index = guard.as_mut().ok_or(VaultError::NotInitialized)?;

        let accounts: Vec<String> = index.iter().cloned().collect();
        self.blocking(move |p| {
            for account in &accounts {
                p.delete_item(account)?;
            }
            p.delete_item(INDEX_ITEM)
        })
        .await?;
        index.clear();
        tracing::info!("cleared keychain store");
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Self::check_key(key)?;
        let guard = self.index.lock().await;
        let index = guard.as_ref().ok_or(VaultError::NotInitialized)?;
        Ok(index.contains(key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
