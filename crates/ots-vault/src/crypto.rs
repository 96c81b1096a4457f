//! Password-based key derivation and AES-256-GCM sealing using `ring`.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 producing a 256-bit [`VaultKey`].
//!   Iteration counts below [`MIN_ITERATIONS`] are rejected.
//! - **Encryption/decryption**: AES-256-GCM with a fresh random 96-bit nonce
//!   per call. The 128-bit tag is appended to the ciphertext.
//! - **Random generation**: salts and nonces come from `ring`'s system CSPRNG.
//!
//! Every decryption failure maps to [`CryptoError::Decryption`], whatever the
//! cause, so callers get no oracle about why authentication failed.

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 16;

/// Iteration count used when a vault is created.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Lowest iteration count [`derive_key`] accepts.
pub const MIN_ITERATIONS: u32 = 100_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Key type
// ---------------------------------------------------------------------------

/// A 256-bit symmetric key. The bytes are wiped when the key is dropped and
/// never appear in `Debug` output.
pub struct VaultKey(Zeroizing<[u8; KEY_LEN]>);

impl VaultKey {
    fn unbound(&self) -> Result<UnboundKey, ()> {
        UnboundKey::new(AEAD_ALG, &self.0[..]).map_err(|_| ())
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so each
/// sealing/opening key is bound to the single random nonce of its call.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same inputs always produce the same key.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if `iterations` is below
/// [`MIN_ITERATIONS`] or `salt` is shorter than [`SALT_LEN`].
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<VaultKey, CryptoError> {
    if iterations < MIN_ITERATIONS {
        return Err(CryptoError::KeyDerivation {
            reason: format!("iteration count {iterations} is below the minimum {MIN_ITERATIONS}"),
        });
    }
    if salt.len() < SALT_LEN {
        return Err(CryptoError::KeyDerivation {
            reason: format!("salt must be at least {SALT_LEN} bytes, got {}", salt.len()),
        });
    }
    let rounds = NonZeroU32::new(iterations).ok_or_else(|| CryptoError::KeyDerivation {
        reason: "iteration count must be non-zero".into(),
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(PBKDF2_ALG, rounds, salt, password, &mut key[..]);

    tracing::debug!(iterations, "derived vault key via PBKDF2");
    Ok(VaultKey(key))
}

/// Generate a random salt of [`SALT_LEN`] bytes.
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| CryptoError::RandomSource)?;
    Ok(salt)
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key`.
///
/// Returns `(ciphertext, nonce)`; the ciphertext includes the tag.
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN_BYTES]), CryptoError> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Encrypt `plaintext` under `key`, binding `aad` as associated data.
///
/// The same `aad` must be supplied to [`decrypt_with_aad`].
pub fn encrypt_with_aad(
    key: &VaultKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN_BYTES]), CryptoError> {
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| CryptoError::RandomSource)?;

    let unbound = key.unbound().map_err(|()| CryptoError::Encryption {
        reason: "failed to create AES-256-GCM key".into(),
    })?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce(Some(nonce)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Encryption {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted payload"
    );

    Ok((in_out, nonce))
}

/// Decrypt `ciphertext` (tag included) produced by [`encrypt`].
pub fn decrypt(key: &VaultKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    decrypt_with_aad(key, ciphertext, nonce, &[])
}

/// Decrypt `ciphertext` produced by [`encrypt_with_aad`] with the same `aad`.
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] for a wrong key, a tampered or
/// truncated ciphertext, a nonce of the wrong length or a mismatched `aad`.
pub fn decrypt_with_aad(
    key: &VaultKey,
    ciphertext: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce: [u8; NONCE_LEN_BYTES] = nonce.try_into().map_err(|_| CryptoError::Decryption)?;
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let unbound = key.unbound().map_err(|()| CryptoError::Decryption)?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce(Some(nonce)));

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening_key
        .open_in_place(Aad::from(aad), in_out.as_mut_slice())
        .map_err(|_| CryptoError::Decryption)?
        .len();
    in_out.truncate(plaintext_len);

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len,
        "decrypted payload"
    );

    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
