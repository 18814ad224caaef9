// tests/key_management_tests.rs
//! Derivation, encryption and persistence working together.

use std::sync::Arc;

use multi_chain_wallet::blockchain::registry::ChainAdapterRegistry;
use multi_chain_wallet::core::bip44::derive_key;
use multi_chain_wallet::core::config::WalletConfig;
use multi_chain_wallet::core::derivation::derive_addresses;
use multi_chain_wallet::core::domain::{ChainKind, KeyType};
use multi_chain_wallet::core::errors::WalletError;
use multi_chain_wallet::security::encryption::{decrypt_secret, encrypt_secret, verify_password};
use multi_chain_wallet::security::secret::WalletSecret;
use multi_chain_wallet::service::wallet::WalletService;
use multi_chain_wallet::storage::{EncryptedLocalStorage, SecureStorage, StoreOptions, WalletStore};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const ITERATIONS: u32 = 100_000;

#[test]
fn test_reference_ethereum_address() {
    let key = derive_key(&WalletSecret::new(ABANDON), ChainKind::Evm, 0, 0).unwrap();
    assert_eq!(key.derivation_path.as_deref(), Some("m/44'/60'/0'/0/0"));
    assert_eq!(key.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
}

#[test]
fn test_derived_addresses_follow_config_order() {
    let chains = WalletConfig::default().chains;
    let derived = derive_addresses(&WalletSecret::new(ABANDON), KeyType::Mnemonic, &chains).unwrap();
    let ids: Vec<_> = derived.iter().map(|d| d.chain_id.as_str()).collect();
    assert_eq!(ids, vec!["ethereum", "binance", "tron", "bitcoin", "bfmeta"]);
    assert!(derived[2].address.starts_with('T'));
    assert!(derived[3].address.starts_with("bc1q"));
    assert!(derived[4].address.starts_with('b'));
    assert!(derive_addresses(&WalletSecret::new(ABANDON), KeyType::Mnemonic, &[]).unwrap().is_empty());
}

#[test]
fn test_encryption_edge_inputs() {
    for input in ["", "密码 🔐 ünïcödé", &"x".repeat(10_000)] {
        let secret = WalletSecret::new(input);
        let blob = encrypt_secret(&secret, "pw", ITERATIONS).unwrap();
        assert_eq!(decrypt_secret(&blob, "pw").unwrap().expose(), input);
        assert!(!verify_password(&blob, "other"));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_encrypt_round_trips_and_differs(plain in ".{0,64}", password in "[a-zA-Z0-9]{1,16}") {
        let secret = WalletSecret::new(plain.clone());
        let a = encrypt_secret(&secret, &password, ITERATIONS).unwrap();
        let b = encrypt_secret(&secret, &password, ITERATIONS).unwrap();
        prop_assert_ne!(&a.ciphertext, &b.ciphertext);
        prop_assert_ne!(&a.salt, &b.salt);
        let back = decrypt_secret(&a, &password).unwrap();
        prop_assert_eq!(back.expose(), plain.as_str());
        let wrong = format!("{}!", password);
        prop_assert!(matches!(decrypt_secret(&a, &wrong), Err(WalletError::DecryptionFailed)));
    }
}

#[tokio::test]
async fn test_wallet_and_secret_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/wallet.db?mode=rwc", dir.path().display());
    let password = WalletSecret::new("correct horse");

    let wallet_id = {
        let store = WalletStore::new_with_url(&url).await.unwrap();
        let secrets: Arc<dyn SecureStorage> = Arc::new(EncryptedLocalStorage::new(store.clone()));
        let service = WalletService::new(
            store,
            secrets,
            Arc::new(ChainAdapterRegistry::new()),
            WalletConfig::default().chains,
        );
        service
            .import_wallet("Main", &WalletSecret::new(ABANDON), KeyType::Mnemonic, &password)
            .await
            .unwrap()
            .id
    };

    let store = WalletStore::new_with_url(&url).await.unwrap();
    let wallet = store.get_wallet(&wallet_id).await.unwrap().unwrap();
    assert_eq!(wallet.primary_address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");

    let secrets = EncryptedLocalStorage::new(store);
    let secret = secrets
        .retrieve(&wallet.secret_ref, &StoreOptions::with_password(&password))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(secret.expose(), ABANDON);

    let blob = secrets.blob(&wallet.secret_ref).await.unwrap().unwrap();
    assert_eq!(blob.iterations, ITERATIONS);
    assert!(!blob.ciphertext.contains("abandon"));
}
