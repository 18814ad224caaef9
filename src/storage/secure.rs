//! Secure storage for wallet secrets.
//!
//! Two backends share the [`SecureStorage`] contract:
//! - [`EncryptedLocalStorage`]: AES-256-GCM blob in a key/value store,
//!   password required on every store and retrieve.
//! - [`KeychainStorage`]: hands the secret to a platform keychain behind
//!   [`NativeKeychain`], optionally gated by biometrics.
//!
//! A missing key reads as `None`, never as an error.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::WalletError;
use crate::security::encryption::{decrypt_secret, encrypt_secret, EncryptedBlob, DEFAULT_PBKDF2_ITERATIONS};
use crate::security::secret::WalletSecret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    EncryptedLocal,
    Keychain,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::EncryptedLocal => "encrypted_local",
            StorageBackend::Keychain => "keychain",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Default)]
pub struct StoreOptions<'a> {
    pub password: Option<&'a WalletSecret>,
    pub use_biometric: bool,
}

impl<'a> StoreOptions<'a> {
    pub fn with_password(password: &'a WalletSecret) -> Self {
        Self { password: Some(password), use_biometric: false }
    }

    pub fn biometric() -> Self {
        Self { password: None, use_biometric: true }
    }
}

impl fmt::Debug for StoreOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("password", &self.password.map(|_| "[REDACTED]"))
            .field("use_biometric", &self.use_biometric)
            .finish()
    }
}

#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn store(&self, key: &str, secret: &WalletSecret, opts: &StoreOptions<'_>) -> Result<(), WalletError>;

    async fn retrieve(&self, key: &str, opts: &StoreOptions<'_>) -> Result<Option<WalletSecret>, WalletError>;

    /// Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, WalletError>;

    async fn exists(&self, key: &str) -> Result<bool, WalletError>;

    async fn get_type(&self, key: &str) -> Result<Option<StorageBackend>, WalletError>;
}

/// Plain string key/value persistence used by [`EncryptedLocalStorage`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn kv_get(&self, key: &str) -> Result<Option<String>, WalletError>;
    async fn kv_put(&self, key: &str, value: &str) -> Result<(), WalletError>;
    async fn kv_delete(&self, key: &str) -> Result<bool, WalletError>;
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn kv_get(&self, key: &str) -> Result<Option<String>, WalletError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<(), WalletError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<bool, WalletError> {
        Ok(self.entries.lock().remove(key).is_some())
    }
}

pub struct EncryptedLocalStorage<K: KeyValueStore> {
    kv: K,
    iterations: u32,
}

impl<K: KeyValueStore> EncryptedLocalStorage<K> {
    pub fn new(kv: K) -> Self {
        Self::with_iterations(kv, DEFAULT_PBKDF2_ITERATIONS)
    }

    pub fn with_iterations(kv: K, iterations: u32) -> Self {
        Self { kv, iterations }
    }

    fn password<'a>(opts: &StoreOptions<'a>) -> Result<&'a WalletSecret, WalletError> {
        opts.password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| WalletError::AuthenticationFailed("password required for encrypted storage".into()))
    }

    /// Reads the stored blob without decrypting it.
    pub async fn blob(&self, key: &str) -> Result<Option<EncryptedBlob>, WalletError> {
        match self.kv.kv_get(key).await? {
            Some(json) => Ok(Some(EncryptedBlob::from_json(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<K: KeyValueStore> SecureStorage for EncryptedLocalStorage<K> {
    async fn store(&self, key: &str, secret: &WalletSecret, opts: &StoreOptions<'_>) -> Result<(), WalletError> {
        let password = Self::password(opts)?;
        let blob = encrypt_secret(secret, password.expose(), self.iterations)?;
        self.kv.kv_put(key, &blob.to_json()?).await?;
        debug!(key, "Stored encrypted secret");
        Ok(())
    }

    async fn retrieve(&self, key: &str, opts: &StoreOptions<'_>) -> Result<Option<WalletSecret>, WalletError> {
        let password = Self::password(opts)?;
        match self.blob(key).await? {
            Some(blob) => Ok(Some(decrypt_secret(&blob, password.expose())?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, WalletError> {
        self.kv.kv_delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, WalletError> {
        Ok(self.kv.kv_get(key).await?.is_some())
    }

    async fn get_type(&self, key: &str) -> Result<Option<StorageBackend>, WalletError> {
        Ok(self.exists(key).await?.then_some(StorageBackend::EncryptedLocal))
    }
}

/// Platform keychain (iOS Keychain, Android Keystore, ...). Implemented
/// outside this crate.
#[async_trait]
pub trait NativeKeychain: Send + Sync {
    async fn set_item(&self, key: &str, value: &str, biometric: bool) -> Result<(), WalletError>;
    /// Prompts for biometrics when the item was stored with `biometric`.
    async fn get_item(&self, key: &str) -> Result<Option<String>, WalletError>;
    async fn remove_item(&self, key: &str) -> Result<bool, WalletError>;
    async fn has_item(&self, key: &str) -> Result<bool, WalletError>;
}

pub struct KeychainStorage<N: NativeKeychain> {
    keychain: N,
}

impl<N: NativeKeychain> KeychainStorage<N> {
    pub fn new(keychain: N) -> Self {
        Self { keychain }
    }
}

#[async_trait]
impl<N: NativeKeychain> SecureStorage for KeychainStorage<N> {
    async fn store(&self, key: &str, secret: &WalletSecret, opts: &StoreOptions<'_>) -> Result<(), WalletError> {
        self.keychain.set_item(key, secret.expose(), opts.use_biometric).await
    }

    async fn retrieve(&self, key: &str, _opts: &StoreOptions<'_>) -> Result<Option<WalletSecret>, WalletError> {
        Ok(self.keychain.get_item(key).await?.map(WalletSecret::from))
    }

    async fn delete(&self, key: &str) -> Result<bool, WalletError> {
        self.keychain.remove_item(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, WalletError> {
        self.keychain.has_item(key).await
    }

    async fn get_type(&self, key: &str) -> Result<Option<StorageBackend>, WalletError> {
        Ok(self.exists(key).await?.then_some(StorageBackend::Keychain))
    }
}

/// Keychain double. `deny_biometric` simulates a cancelled prompt.
#[derive(Default)]
pub struct InMemoryKeychain {
    items: Mutex<HashMap<String, (WalletSecret, bool)>>,
    deny_biometric: Mutex<bool>,
}

impl InMemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_biometric(&self, deny: bool) {
        *self.deny_biometric.lock() = deny;
    }
}

#[async_trait]
impl NativeKeychain for InMemoryKeychain {
    async fn set_item(&self, key: &str, value: &str, biometric: bool) -> Result<(), WalletError> {
        self.items
            .lock()
            .insert(key.to_string(), (WalletSecret::new(value), biometric));
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, WalletError> {
        let deny = *self.deny_biometric.lock();
        match self.items.lock().get(key) {
            Some((_, true)) if deny => Err(WalletError::AuthenticationFailed("biometric prompt cancelled".into())),
            Some((value, _)) => Ok(Some(value.expose().to_string())),
            None => Ok(None),
        }
    }

    async fn remove_item(&self, key: &str) -> Result<bool, WalletError> {
        Ok(self.items.lock().remove(key).is_some())
    }

    async fn has_item(&self, key: &str) -> Result<bool, WalletError> {
        Ok(self.items.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[tokio::test]
    async fn test_encrypted_round_trip() {
        let storage = EncryptedLocalStorage::new(MemoryKeyValueStore::new());
        let password = WalletSecret::new("correct horse");
        let opts = StoreOptions::with_password(&password);

        storage.store("wallet:1", &WalletSecret::new(MNEMONIC), &opts).await.unwrap();
        assert!(storage.exists("wallet:1").await.unwrap());
        assert_eq!(storage.get_type("wallet:1").await.unwrap(), Some(StorageBackend::EncryptedLocal));

        let back = storage.retrieve("wallet:1", &opts).await.unwrap().unwrap();
        assert_eq!(back.expose(), MNEMONIC);

        let blob = storage.blob("wallet:1").await.unwrap().unwrap();
        assert!(!blob.ciphertext.contains("abandon"));
    }

    #[tokio::test]
    async fn test_encrypted_requires_password() {
        let storage = EncryptedLocalStorage::new(MemoryKeyValueStore::new());
        let err = storage
            .store("k", &WalletSecret::new("s"), &StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed(_)));

        let empty = WalletSecret::new("");
        let err = storage
            .retrieve("k", &StoreOptions::with_password(&empty))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_encrypted_wrong_password_and_missing_key() {
        let storage = EncryptedLocalStorage::new(MemoryKeyValueStore::new());
        let password = WalletSecret::new("right password");
        storage
            .store("k", &WalletSecret::new("secret"), &StoreOptions::with_password(&password))
            .await
            .unwrap();

        let wrong = WalletSecret::new("wrong password");
        assert!(matches!(
            storage.retrieve("k", &StoreOptions::with_password(&wrong)).await,
            Err(WalletError::DecryptionFailed)
        ));
        assert!(storage
            .retrieve("missing", &StoreOptions::with_password(&password))
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.get_type("missing").await.unwrap(), None);

        assert!(storage.delete("k").await.unwrap());
        assert!(!storage.delete("k").await.unwrap());
        assert!(!storage.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_keychain_backend() {
        let storage = KeychainStorage::new(InMemoryKeychain::new());
        storage
            .store("k", &WalletSecret::new("secret"), &StoreOptions::biometric())
            .await
            .unwrap();
        assert_eq!(storage.get_type("k").await.unwrap(), Some(StorageBackend::Keychain));
        let back = storage.retrieve("k", &StoreOptions::default()).await.unwrap().unwrap();
        assert_eq!(back.expose(), "secret");

        storage.keychain.deny_biometric(true);
        assert!(matches!(
            storage.retrieve("k", &StoreOptions::default()).await,
            Err(WalletError::AuthenticationFailed(_))
        ));
        assert!(storage.retrieve("missing", &StoreOptions::default()).await.unwrap().is_none());
    }

    #[test]
    fn test_store_options_debug_hides_password() {
        let password = WalletSecret::new("hunter22");
        let printed = format!("{:?}", StoreOptions::with_password(&password));
        assert!(!printed.contains("hunter22"));
    }
}
