//! Password-based encryption of wallet secrets.
//!
//! PBKDF2-HMAC-SHA256 stretches the password into a 256-bit key which seals
//! the plaintext with AES-256-GCM. Salt and IV are fresh per call. The
//! functions are pure: no key material is cached between calls.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;
use crate::security::secret::{SecretVec, WalletSecret};

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Self-describing ciphertext. Byte fields are standard Base64 so the blob
/// survives a JSON round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
    pub iterations: u32,
}

impl EncryptedBlob {
    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, WalletError> {
        Ok(serde_json::from_str(s)?)
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Encrypts with the default iteration count.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<EncryptedBlob, WalletError> {
    encrypt_with_iterations(plaintext, password, DEFAULT_PBKDF2_ITERATIONS)
}

pub fn encrypt_with_iterations(
    plaintext: &[u8],
    password: &str,
    iterations: u32,
) -> Result<EncryptedBlob, WalletError> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(WalletError::CryptoError(format!(
            "at least {} PBKDF2 iterations required",
            MIN_PBKDF2_ITERATIONS
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| WalletError::CryptoError("Invalid key length".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| WalletError::CryptoError("Encryption failed".to_string()))?;

    Ok(EncryptedBlob {
        ciphertext: BASE64.encode(ciphertext),
        salt: BASE64.encode(salt),
        iv: BASE64.encode(iv),
        iterations,
    })
}

/// Any failure (bad Base64, wrong lengths, wrong password, tampering) maps to
/// `DecryptionFailed`.
pub fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<SecretVec, WalletError> {
    let salt = BASE64.decode(&blob.salt).map_err(|_| WalletError::DecryptionFailed)?;
    let iv = BASE64.decode(&blob.iv).map_err(|_| WalletError::DecryptionFailed)?;
    let ciphertext = BASE64.decode(&blob.ciphertext).map_err(|_| WalletError::DecryptionFailed)?;
    if salt.len() != SALT_LEN || iv.len() != IV_LEN || blob.iterations == 0 {
        return Err(WalletError::DecryptionFailed);
    }

    let key = derive_key(password, &salt, blob.iterations);
    let cipher =
        Aes256Gcm::new_from_slice(&key[..]).map_err(|_| WalletError::DecryptionFailed)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| WalletError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}

pub fn encrypt_secret(
    secret: &WalletSecret,
    password: &str,
    iterations: u32,
) -> Result<EncryptedBlob, WalletError> {
    encrypt_with_iterations(secret.expose().as_bytes(), password, iterations)
}

pub fn decrypt_secret(blob: &EncryptedBlob, password: &str) -> Result<WalletSecret, WalletError> {
    let bytes = decrypt(blob, password)?;
    WalletSecret::from_utf8(bytes).ok_or(WalletError::DecryptionFailed)
}

/// True iff `decrypt` would succeed.
pub fn verify_password(blob: &EncryptedBlob, password: &str) -> bool {
    decrypt(blob, password).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_simple() {
        let blob = encrypt(b"abandon abandon about", "correct horse").unwrap();
        let plain = decrypt(&blob, "correct horse").unwrap();
        assert_eq!(&plain[..], b"abandon abandon about");
        assert_eq!(blob.iterations, DEFAULT_PBKDF2_ITERATIONS);
    }

    #[test]
    fn test_round_trip_empty_unicode_and_long() {
        let long = "x".repeat(10_000);
        for input in ["", "密钥🔑 ünïcödé", long.as_str()] {
            let blob = encrypt(input.as_bytes(), "pw-12345678").unwrap();
            let out = decrypt_secret(&blob, "pw-12345678").unwrap();
            assert_eq!(out.expose(), input);
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let blob = encrypt(b"secret", "right-password").unwrap();
        let err = decrypt(&blob, "wrong-password").unwrap_err();
        assert!(matches!(err, WalletError::DecryptionFailed));
        assert!(!verify_password(&blob, "wrong-password"));
        assert!(verify_password(&blob, "right-password"));
    }

    #[test]
    fn test_two_encryptions_differ() {
        let a = encrypt(b"same", "pw").unwrap();
        let b = encrypt(b"same", "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut blob = encrypt(b"payload", "pw").unwrap();
        let mut raw = BASE64.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0x01;
        blob.ciphertext = BASE64.encode(raw);
        assert!(matches!(decrypt(&blob, "pw"), Err(WalletError::DecryptionFailed)));
    }

    #[test]
    fn test_malformed_fields_fail_uniformly() {
        let mut blob = encrypt(b"payload", "pw").unwrap();
        blob.iv = "not base64!!".into();
        assert!(matches!(decrypt(&blob, "pw"), Err(WalletError::DecryptionFailed)));

        let mut blob = encrypt(b"payload", "pw").unwrap();
        blob.salt = BASE64.encode([0u8; 4]);
        assert!(matches!(decrypt(&blob, "pw"), Err(WalletError::DecryptionFailed)));
    }

    #[test]
    fn test_rejects_weak_iterations() {
        assert!(encrypt_with_iterations(b"x", "pw", 1_000).is_err());
    }

    #[test]
    fn test_blob_json_round_trip() {
        let blob = encrypt(b"payload", "pw").unwrap();
        let json = blob.to_json().unwrap();
        for field in ["ciphertext", "salt", "iv", "iterations"] {
            assert!(json.contains(field));
        }
        let back = EncryptedBlob::from_json(&json).unwrap();
        assert_eq!(back, blob);
        assert_eq!(&decrypt(&back, "pw").unwrap()[..], b"payload");
    }
}
