//! File-backed encrypted key-value store.
//!
//! The [`Vault`] keeps every entry encrypted with AES-256-GCM under a key
//! derived from the user's password. The whole entry map lives in a single
//! JSON file:
//!
//! ```text
//! {
//!   "version": 1,
//!   "kdf":     { "salt": "<b64>", "iterations": 600000 },
//!   "check":   { "ciphertext": "<b64>", "nonce": "<b64>" },
//!   "entries": { "<key>": { "ciphertext": "<b64>", "nonce": "<b64>" } }
//! }
//! ```
//!
//! `check` is a known marker sealed under the vault key; it lets a wrong
//! password fail at [`Vault::initialize`] instead of at the first read.
//! Each entry binds its own key as AEAD associated data, so ciphertexts
//! cannot be swapped between keys.
//!
//! # Durability
//!
//! Every mutating call performs exactly one durable write: the full map is
//! serialized to `<file>.tmp`, fsynced, then renamed over the store file.
//! A crash at any point leaves either the previous or the new file on disk.
//! Mutations run in a spawned task that owns the store lock, so dropping the
//! caller's future never leaves memory and disk out of step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{self, VaultKey};
use crate::error::{Result, VaultError};

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Plaintext sealed into the `check` record.
const CHECK_MARKER: &[u8] = b"ots-vault-check-v1";

/// Associated data for the `check` record. Entry keys can never collide with
/// it because they are bound under a different prefix.
const CHECK_AAD: &[u8] = b"check";

/// Default file name inside a data directory.
pub const VAULT_FILE_NAME: &str = "vault.json";

// ---------------------------------------------------------------------------
// On-disk types
// ---------------------------------------------------------------------------

/// One encrypted entry as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParams {
    #[serde(with = "b64")]
    salt: Vec<u8>,
    iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    kdf: KdfParams,
    check: VaultEntry,
    #[serde(default)]
    entries: BTreeMap<String, VaultEntry>,
}

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn entry_aad(key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(6 + key.len());
    aad.extend_from_slice(b"entry:");
    aad.extend_from_slice(key.as_bytes());
    aad
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VaultError::InvalidKey);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

struct Unlocked {
    key: VaultKey,
    file: VaultFile,
}

/// Encrypted key-value store persisted to a single JSON file.
///
/// # Example
///
/// ```rust,no_run
/// # use ots_vault::Vault;
/// # async fn example() -> ots_vault::Result<()> {
/// let vault = Vault::new("data/vault.json");
/// vault.initialize("correct horse battery staple").await?;
///
/// vault.set("api_token", "tok-123").await?;
/// let token = vault.get("api_token").await?;
/// assert_eq!(token.as_deref().map(String::as_str), Some("tok-123"));
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    path: PathBuf,
    iterations: u32,
    state: Arc<Mutex<Option<Unlocked>>>,
}

impl Vault {
    /// Create a vault handle for `path`. Nothing is read until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_iterations(path, crypto::DEFAULT_ITERATIONS)
    }

    /// Create a vault handle that uses `iterations` PBKDF2 rounds when it
    /// creates a new file. Existing files keep their stored count.
    pub fn with_iterations(path: impl Into<PathBuf>, iterations: u32) -> Self {
        Self {
            path: path.into(),
            iterations,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Location of the vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`initialize`](Self::initialize) has succeeded and
    /// [`lock`](Self::lock) has not been called since.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Derive the vault key from `password` and load (or create) the file.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Crypto`] if the password does not open an existing
    ///   vault, or key derivation fails.
    /// - [`VaultError::Corrupt`] if the file exists but cannot be parsed.
    /// - [`VaultError::Io`] on filesystem failures.
    pub async fn initialize(&self, password: &str) -> Result<()> {
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let mut state = self.state.lock().await;

        let unlocked = match read_file(&self.path).await? {
            Some(file) => {
                let salt = file.kdf.salt.clone();
                let iterations = file.kdf.iterations;
                let key = derive_blocking(password, salt, iterations).await?;
                verify_check(&key, &file.check)?;
                tracing::info!(
                    path = %self.path.display(),
                    entries = file.entries.len(),
                    "opened existing vault"
                );
                Unlocked { key, file }
            }
            None => {
                let salt = crypto::generate_salt()
                    .map_err(|e| VaultError::crypto("failed to generate salt", e))?
                    .to_vec();
                let key = derive_blocking(password, salt.clone(), self.iterations).await?;
                let (ciphertext, nonce) = crypto::encrypt_with_aad(&key, CHECK_MARKER, CHECK_AAD)
                    .map_err(|e| VaultError::crypto("failed to seal check record", e))?;
                let file = VaultFile {
                    version: FORMAT_VERSION,
                    kdf: KdfParams {
                        salt,
                        iterations: self.iterations,
                    },
                    check: VaultEntry {
                        ciphertext,
                        nonce: nonce.to_vec(),
                    },
                    entries: BTreeMap::new(),
                };
                write_atomic(&self.path, &file).await?;
                tracing::info!(path = %self.path.display(), "created new vault");
                Unlocked { key, file }
            }
        };

        *state = Some(unlocked);
        Ok(())
    }

    /// Drop the in-memory key and entries. Subsequent operations fail with
    /// [`VaultError::NotInitialized`] until the vault is initialized again.
    pub async fn lock(&self) {
        let mut state = self.state.lock().await;
        if state.take().is_some() {
            tracing::debug!(path = %self.path.display(), "vault locked");
        }
    }

    /// Decrypt and return the value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Crypto`] if the entry fails authentication.
    pub async fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>> {
        validate_key(key)?;
        let state = self.state.lock().await;
        let unlocked = state.as_ref().ok_or(VaultError::NotInitialized)?;

        let Some(entry) = unlocked.file.entries.get(key) else {
            return Ok(None);
        };

        let mut plaintext =
            crypto::decrypt_with_aad(&unlocked.key, &entry.ciphertext, &entry.nonce, &entry_aad(key))
                .map_err(|e| VaultError::crypto(format!("failed to decrypt entry `{key}`"), e))?;

        let bytes = std::mem::take(&mut *plaintext);
        match String::from_utf8(bytes) {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(VaultError::Corrupt {
                    reason: format!("entry `{key}` is not valid UTF-8"),
                })
            }
        }
    }

    /// Whether an entry exists for `key`. Does not decrypt.
    pub async fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let state = self.state.lock().await;
        let unlocked = state.as_ref().ok_or(VaultError::NotInitialized)?;
        Ok(unlocked.file.entries.contains_key(key))
    }

    /// Sorted list of stored keys. Does not decrypt.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let unlocked = state.as_ref().ok_or(VaultError::NotInitialized)?;
        Ok(unlocked.file.entries.keys().cloned().collect())
    }

    /// Encrypt `value` and store it under `key`, replacing any previous value.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let name = key.to_string();
        let value = Zeroizing::new(value.as_bytes().to_vec());

        self.mutate("set", move |vault_key, file| {
            let (ciphertext, nonce) = crypto::encrypt_with_aad(vault_key, &value, &entry_aad(&name))
                .map_err(|e| VaultError::crypto(format!("failed to encrypt entry `{name}`"), e))?;
            file.entries.insert(
                name,
                VaultEntry {
                    ciphertext,
                    nonce: nonce.to_vec(),
                },
            );
            Ok(())
        })
        .await
    }

    /// Remove the entry for `key`. Removing a missing key is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let name = key.to_string();
        self.mutate("remove", move |_, file| {
            file.entries.remove(&name);
            Ok(())
        })
        .await
    }

    /// Remove every entry. Clearing an empty vault is not an error.
    pub async fn clear(&self) -> Result<()> {
        self.mutate("clear", |_, file| {
            file.entries.clear();
            Ok(())
        })
        .await
    }

    /// Apply `op` to a copy of the entry map, persist it, then publish it.
    ///
    /// Runs on a spawned task so the write-then-publish sequence completes
    /// even if the caller stops polling.
    async fn mutate<F>(&self, op: &'static str, apply: F) -> Result<()>
    where
        F: FnOnce(&VaultKey, &mut VaultFile) -> Result<()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let path = self.path.clone();

        let task = tokio::spawn(async move {
            let mut guard = state.lock().await;
            let unlocked = guard.as_mut().ok_or(VaultError::NotInitialized)?;

            let mut next = unlocked.file.clone();
            apply(&unlocked.key, &mut next)?;
            write_atomic(&path, &next).await?;

            tracing::debug!(op, entries = next.entries.len(), "vault updated");
            unlocked.file = next;
            Ok(())
        });

        task.await
            .map_err(|e| VaultError::Internal(format!("vault {op} task failed: {e}")))?
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn derive_blocking(
    password: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    iterations: u32,
) -> Result<VaultKey> {
    tokio::task::spawn_blocking(move || crypto::derive_key(&password, &salt, iterations))
        .await
        .map_err(|e| VaultError::Internal(format!("key derivation task failed: {e}")))?
        .map_err(|e| VaultError::crypto("failed to derive vault key", e))
}

fn verify_check(key: &VaultKey, check: &VaultEntry) -> Result<()> {
    let marker = crypto::decrypt_with_aad(key, &check.ciphertext, &check.nonce, CHECK_AAD)
        .map_err(|e| VaultError::crypto("wrong password or corrupt vault", e))?;
    if marker.as_slice() != CHECK_MARKER {
        return Err(VaultError::Corrupt {
            reason: "check record does not match".into(),
        });
    }
    Ok(())
}

async fn read_file(path: &Path) -> Result<Option<VaultFile>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: VaultFile = serde_json::from_slice(&raw).map_err(|e| VaultError::Corrupt {
        reason: e.to_string(),
    })?;
    if file.version != FORMAT_VERSION {
        return Err(VaultError::Corrupt {
            reason: format!("unsupported format version {}", file.version),
        });
    }
    Ok(Some(file))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `file`, write it next to `path`, fsync, and rename over `path`.
async fn write_atomic(path: &Path, file: &VaultFile) -> Result<()> {
    let json = serde_json::to_vec_pretty(file)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut out = options.open(&tmp).await?;
    out.write_all(&json).await?;
    out.sync_all().await?;
    drop(out);

    tokio::fs::rename(&tmp, path).await?;

    if let Err(e) = sync_parent_dir(path).await {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to fsync vault directory; rename may not be durable"
        );
    }

    Ok(())
}

/// Fsync the directory holding `path` so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault(dir: &tempfile::TempDir) -> Vault {
        Vault::with_iterations(dir.path().join(VAULT_FILE_NAME), crypto::MIN_ITERATIONS)
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);

        assert!(matches!(vault.get("a").await, Err(VaultError::NotInitialized)));
        assert!(matches!(vault.set("a", "b").await, Err(VaultError::NotInitialized)));
        assert!(matches!(vault.has("a").await, Err(VaultError::NotInitialized)));
        assert!(matches!(vault.clear().await, Err(VaultError::NotInitialized)));
        assert!(!vault.path().exists());
    }

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);
        vault.initialize("pw").await.unwrap();

        assert!(vault.get("missing").await.unwrap().is_none());

        vault.set("token", "abc").await.unwrap();
        assert_eq!(vault.get("token").await.unwrap().unwrap().as_str(), "abc");
        assert!(vault.has("token").await.unwrap());

        vault.set("token", "def").await.unwrap();
        assert_eq!(vault.get("token").await.unwrap().unwrap().as_str(), "def");

        vault.remove("token").await.unwrap();
        vault.remove("token").await.unwrap();
        assert!(!vault.has("token").await.unwrap());
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);
        vault.initialize("pw").await.unwrap();
        assert!(matches!(vault.set("", "x").await, Err(VaultError::InvalidKey)));
    }

    #[tokio::test]
    async fn file_never_contains_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);
        vault.initialize("pw").await.unwrap();
        vault.set("token", "very-secret-token-value").await.unwrap();

        let raw = std::fs::read_to_string(vault.path()).unwrap();
        assert!(raw.contains("\"token\""));
        assert!(!raw.contains("very-secret-token-value"));
    }

    #[tokio::test]
    async fn swapped_ciphertexts_fail_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);
        vault.initialize("pw").await.unwrap();
        vault.set("a", "value-a").await.unwrap();
        vault.set("b", "value-b").await.unwrap();

        {
            let mut state = vault.state.lock().await;
            let file = &mut state.as_mut().unwrap().file;
            let a = file.entries["a"].clone();
            file.entries.insert("b".into(), a);
        }

        let err = vault.get("b").await.unwrap_err();
        assert!(err.crypto_cause().is_some());
    }

    #[tokio::test]
    async fn lock_forgets_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);
        vault.initialize("pw").await.unwrap();
        vault.set("k", "v").await.unwrap();

        vault.lock().await;
        assert!(!vault.is_initialized().await);
        assert!(matches!(vault.get("k").await, Err(VaultError::NotInitialized)));

        vault.initialize("pw").await.unwrap();
        assert_eq!(vault.get("k").await.unwrap().unwrap().as_str(), "v");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/x/vault.json")),
            PathBuf::from("/x/vault.json.tmp")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directory_sync_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sync_parent_dir(&dir.path().join(VAULT_FILE_NAME)).await.is_ok());

        let missing = dir.path().join("gone").join(VAULT_FILE_NAME);
        assert!(sync_parent_dir(&missing).await.is_err());
    }
}
