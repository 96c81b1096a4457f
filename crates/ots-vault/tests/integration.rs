//! Integration tests for the ots-vault crate.
//!
//! These tests exercise the on-disk vault lifecycle: reopening, wrong
//! passwords, crash leftovers, concurrent writers and backend selection.

use std::sync::Arc;
use std::time::Duration;

use ots_vault::crypto;
use ots_vault::{CryptoError, SecureStore, StoreOptions, VAULT_FILE_NAME, Vault, VaultError};

fn vault_at(dir: &tempfile::TempDir) -> Vault {
    Vault::with_iterations(dir.path().join(VAULT_FILE_NAME), crypto::MIN_ITERATIONS)
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let vault = vault_at(&dir);
    vault.initialize("hunter2").await.unwrap();
    vault.set("apiToken", "tok-1").await.unwrap();
    vault.set("username", "me@example.com").await.unwrap();
    drop(vault);

    let reopened = vault_at(&dir);
    reopened.initialize("hunter2").await.unwrap();
    assert_eq!(reopened.get("apiToken").await.unwrap().unwrap().as_str(), "tok-1");
    assert_eq!(
        reopened.keys().await.unwrap(),
        vec!["apiToken".to_string(), "username".to_string()]
    );
    assert!(reopened.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn wrong_password_is_a_crypto_error() {
    let dir = tempfile::tempdir().unwrap();

    let vault = vault_at(&dir);
    vault.initialize("right").await.unwrap();
    vault.set("k", "v").await.unwrap();

    let other = vault_at(&dir);
    let err = other.initialize("wrong").await.unwrap_err();
    assert!(matches!(err, VaultError::Crypto { .. }));
    assert_eq!(err.crypto_cause(), Some(&CryptoError::Decryption));
    assert!(!err.to_string().contains("right"));
    assert!(!other.is_initialized().await);
}

#[tokio::test]
async fn stale_tmp_file_is_ignored_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(VAULT_FILE_NAME);
    let tmp = dir.path().join(format!("{VAULT_FILE_NAME}.tmp"));

    let vault = vault_at(&dir);
    vault.initialize("pw").await.unwrap();
    vault.set("k", "old").await.unwrap();
    drop(vault);

    // A crash between the tmp write and the rename leaves junk behind.
    std::fs::write(&tmp, b"{ half-written").unwrap();

    let vault = vault_at(&dir);
    vault.initialize("pw").await.unwrap();
    assert_eq!(vault.get("k").await.unwrap().unwrap().as_str(), "old");

    vault.set("k", "new").await.unwrap();
    assert!(!tmp.exists());
    assert!(path.exists());
    drop(vault);

    let vault = vault_at(&dir);
    vault.initialize("pw").await.unwrap();
    assert_eq!(vault.get("k").await.unwrap().unwrap().as_str(), "new");
}

#[tokio::test]
async fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(VAULT_FILE_NAME), b"not json").unwrap();

    let vault = vault_at(&dir);
    let err = vault.initialize("pw").await.unwrap_err();
    assert!(matches!(err, VaultError::Corrupt { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn vault_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let vault = vault_at(&dir);
    vault.initialize("pw").await.unwrap();
    vault.set("k", "v").await.unwrap();

    let mode = std::fs::metadata(vault.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency and cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn concurrent_sets_are_all_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(vault_at(&dir));
    vault.initialize("pw").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let vault = Arc::clone(&vault);
        handles.push(tokio::spawn(async move {
            vault.set(&format!("key-{i}"), &format!("value-{i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let reopened = vault_at(&dir);
    reopened.initialize("pw").await.unwrap();
    for i in 0..8 {
        let value = reopened.get(&format!("key-{i}")).await.unwrap().unwrap();
        assert_eq!(value.as_str(), format!("value-{i}"));
    }
}

#[tokio::test]
async fn cancelled_set_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_at(&dir);
    vault.initialize("pw").await.unwrap();

    let _ = tokio::time::timeout(Duration::ZERO, vault.set("k", "v")).await;

    let mut stored = false;
    for _ in 0..200 {
        if vault.has("k").await.unwrap() {
            stored = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(stored);

    let reopened = vault_at(&dir);
    reopened.initialize("pw").await.unwrap();
    assert_eq!(reopened.get("k").await.unwrap().unwrap().as_str(), "v");
}

// ═══════════════════════════════════════════════════════════════════════
//  Backend selection
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn software_store_through_trait() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::new(dir.path()).with_iterations(crypto::MIN_ITERATIONS);
    let store: Arc<dyn SecureStore> = ots_vault::open_secure_store(&options);

    assert_eq!(store.backend_name(), "software-aead");
    assert!(matches!(store.get("k").await, Err(VaultError::NotInitialized)));

    store.initialize("pw").await.unwrap();
    store.set("k", "v").await.unwrap();
    assert!(store.has("k").await.unwrap());
    assert!(dir.path().join(VAULT_FILE_NAME).exists());
}
