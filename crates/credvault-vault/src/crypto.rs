//! AES-256-GCM, PBKDF2 and HKDF primitives built on `ring`.
//!
//! Everything above this module (master key sealing, payload encryption)
//! is expressed in terms of these few functions:
//!
//! - **AEAD**: AES-256-GCM with a freshly generated 96-bit nonce for every
//!   seal. The nonce is returned so the caller can frame it next to the
//!   ciphertext.
//! - **PBKDF2-HMAC-SHA256**: turns the operator password into a wrapping key.
//! - **HKDF-SHA256**: turns the master key into purpose-bound content keys.
//! - **Random generation**: `ring::rand::SystemRandom`.
//!
//! # Security Notes
//!
//! - Random 96-bit nonces keep the collision probability negligible for up to
//!   ~2^32 encryptions under one key. A nonce is never derived from a counter
//!   shared between threads, so concurrent callers cannot collide by race.
//! - The PBKDF2 iteration floor is 100,000. The count is fixed per deployment
//!   because the sealed blob does not record it.

use std::num::NonZeroU32;

use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::hkdf;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Length of every symmetric key in the vault (256 bits).
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the AES-256-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Length of the PBKDF2 salt in bytes (128 bits).
pub const SALT_LEN: usize = 16;

/// Lowest accepted PBKDF2 iteration count.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// PBKDF2 algorithm: HMAC-SHA256.
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` binds keys to a [`NonceSequence`]. Each seal/open builds a new
/// bound key around one random nonce, so a key object can never be driven
/// past its single nonce.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Output length marker for HKDF expansion into a 256-bit key.
struct KeyLen;

impl hkdf::KeyType for KeyLen {
    fn len(&self) -> usize {
        KEY_LEN
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM under the 256-bit `key`.
///
/// Returns `(nonce, ciphertext)` where `ciphertext` carries the 16-byte tag
/// appended by `ring`.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the key length is wrong or
/// `ring` reports a failure.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    if key.len() != KEY_LEN {
        return Err(VaultError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let nonce_bytes: [u8; NONCE_LEN_BYTES] =
        random_array().map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "sealed data"
    );

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag included) with the given `nonce` and `key`.
///
/// # Errors
///
/// Returns [`VaultError::Integrity`] when the tag does not verify. No part
/// of the candidate plaintext is returned in that case.
///
/// The returned buffer is the only copy of the plaintext. Callers holding
/// secrets wrap it in [`Zeroizing`].
pub fn decrypt(nonce: &[u8; NONCE_LEN_BYTES], ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(VaultError::Integrity {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let unbound_key = UnboundKey::new(AEAD_ALG, key).map_err(|_| VaultError::Integrity {
        reason: "failed to create AES-256-GCM key".into(),
    })?;

    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(*nonce));

    // Wiped on drop if the tag does not verify.
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening_key
        .open_in_place(Aad::empty(), in_out.as_mut_slice())
        .map_err(|_| VaultError::Integrity {
            reason: "authentication tag mismatch".into(),
        })?
        .len();

    // The opened buffer is the only plaintext copy; the caller owns it.
    in_out.truncate(plaintext_len);
    let result = std::mem::take(&mut *in_out);

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len,
        "opened data"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from `password` and `salt` with PBKDF2-HMAC-SHA256.
pub fn derive_key_with_salt(
    password: &[u8],
    salt: &[u8],
    iterations: NonZeroU32,
    out: &mut [u8; KEY_LEN],
) {
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, password, out);
}

/// Derive a 256-bit key from `ikm` with HKDF-SHA256 (extract then expand).
///
/// # Errors
///
/// Returns [`VaultError::KeyDerivationFailed`] if `ring` rejects the output
/// length, which cannot happen for 32 bytes but is surfaced rather than
/// unwrapped.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);
    let info = [info];
    let okm = prk
        .expand(&info, KeyLen)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "HKDF expand rejected output length".into(),
        })?;

    let mut out = [0u8; KEY_LEN];
    okm.fill(&mut out)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "HKDF fill failed".into(),
        })?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

/// Generate a fixed-size array of cryptographically secure random bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

/// Check an iteration count against the PBKDF2 floor.
pub fn checked_iterations(iterations: u32) -> Result<NonZeroU32> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(VaultError::Configuration {
            reason: format!(
                "pbkdf2 iterations must be at least {MIN_PBKDF2_ITERATIONS}, got {iterations}"
            ),
        });
    }
    NonZeroU32::new(iterations).ok_or_else(|| VaultError::Configuration {
        reason: "pbkdf2 iterations must be non-zero".into(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let plaintext = b"refresh_token=1//0g-abc";

        let (nonce, ciphertext) = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&nonce, &ciphertext, &key).unwrap();

        assert_eq!(decrypted, plaintext);
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
    }

    #[test]
    fn decrypt_returns_the_opened_buffer() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (nonce, ciphertext) = encrypt(b"ya29.a0-secret", &key).unwrap();

        let decrypted = decrypt(&nonce, &ciphertext, &key).unwrap();

        assert_eq!(decrypted, b"ya29.a0-secret");
        // Same allocation as the ciphertext buffer, truncated before the tag.
        assert!(decrypted.capacity() >= ciphertext.len());
    }

    #[test]
    fn decrypt_with_wrong_key_is_integrity_error() {
        let key1 = random_bytes(KEY_LEN).unwrap();
        let key2 = random_bytes(KEY_LEN).unwrap();

        let (nonce, ciphertext) = encrypt(b"secret data", &key1).unwrap();
        let result = decrypt(&nonce, &ciphertext, &key2);

        assert!(matches!(result, Err(VaultError::Integrity { .. })));
    }

    #[test]
    fn decrypt_with_tampered_tag_fails() {
        let key = random_bytes(KEY_LEN).unwrap();

        let (nonce, mut ciphertext) = encrypt(b"secret data", &key).unwrap();
        if let Some(byte) = ciphertext.last_mut() {
            *byte ^= 0x80;
        }

        assert!(decrypt(&nonce, &ciphertext, &key).is_err());
    }

    #[test]
    fn each_seal_uses_a_fresh_nonce() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (n1, c1) = encrypt(b"same", &key).unwrap();
        let (n2, c2) = encrypt(b"same", &key).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = vec![0u8; 16];
        assert!(matches!(
            encrypt(b"test", &short_key),
            Err(VaultError::EncryptionFailed { .. })
        ));
    }

    #[test]
    fn pbkdf2_deterministic_with_same_salt() {
        let iterations = checked_iterations(MIN_PBKDF2_ITERATIONS).unwrap();
        let salt: [u8; SALT_LEN] = random_array().unwrap();

        let mut key1 = [0u8; KEY_LEN];
        let mut key2 = [0u8; KEY_LEN];
        derive_key_with_salt(b"pw", &salt, iterations, &mut key1);
        derive_key_with_salt(b"pw", &salt, iterations, &mut key2);
        assert_eq!(key1, key2);

        let mut key3 = [0u8; KEY_LEN];
        derive_key_with_salt(b"pw2", &salt, iterations, &mut key3);
        assert_ne!(key1, key3);
    }

    #[test]
    fn iteration_floor_enforced() {
        assert!(checked_iterations(99_999).is_err());
        assert!(checked_iterations(0).is_err());
        assert_eq!(checked_iterations(600_000).unwrap().get(), 600_000);
    }

    #[test]
    fn hkdf_matches_rfc5869_case_1() {
        let ikm = [0x0b_u8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let okm = hkdf_sha256(&ikm, &salt, &info).unwrap();

        let expected: [u8; KEY_LEN] = [
            0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0, 0x36,
            0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0, 0x2d, 0x56,
            0xec, 0xc4, 0xc5, 0xbf,
        ];
        assert_eq!(okm, expected);
    }

    #[test]
    fn hkdf_info_separates_domains() {
        let ikm = random_bytes(KEY_LEN).unwrap();
        let a = hkdf_sha256(&ikm, b"salt", b"credential-encryption").unwrap();
        let b = hkdf_sha256(&ikm, b"salt", b"session-signing").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (nonce, ciphertext) = encrypt(b"", &key).unwrap();
        assert_eq!(ciphertext.len(), TAG_LEN);
        assert!(decrypt(&nonce, &ciphertext, &key).unwrap().is_empty());
    }
}
