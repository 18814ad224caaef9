//! Wallet lifecycle: create, import, rename, re-encrypt, delete, list and
//! balance refresh.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blockchain::registry::ChainAdapterRegistry;
use crate::core::derivation::derive_addresses;
use crate::core::domain::{AssetBalance, ChainAddress, ChainConfig, KeyType, Wallet};
use crate::core::errors::WalletError;
use crate::core::mnemonic::{generate_mnemonic, parse_mnemonic, WordCount};
use crate::security::password_validator::{validate_password, PasswordPolicy};
use crate::security::secret::WalletSecret;
use crate::storage::{SecureStorage, StoreOptions, WalletStore};

/// A freshly generated wallet together with its mnemonic, shown once for
/// backup.
#[derive(Debug)]
pub struct CreatedWallet {
    pub wallet: Wallet,
    pub mnemonic: WalletSecret,
}

pub struct WalletService {
    wallets: WalletStore,
    secrets: Arc<dyn SecureStorage>,
    registry: Arc<ChainAdapterRegistry>,
    chains: Vec<ChainConfig>,
    policy: PasswordPolicy,
}

impl WalletService {
    pub fn new(
        wallets: WalletStore,
        secrets: Arc<dyn SecureStorage>,
        registry: Arc<ChainAdapterRegistry>,
        chains: Vec<ChainConfig>,
    ) -> Self {
        Self { wallets, secrets, registry, chains, policy: PasswordPolicy::default() }
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn secret_ref(wallet_id: &str) -> String {
        format!("wallet:{}:secret", wallet_id)
    }

    fn validate_name(name: &str) -> Result<String, WalletError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WalletError::ValidationError("wallet name must not be empty".into()));
        }
        Ok(name.to_string())
    }

    /// Generates a mnemonic and stores a wallet for it.
    pub async fn create_wallet(
        &self,
        name: &str,
        password: &WalletSecret,
        words: WordCount,
    ) -> Result<CreatedWallet, WalletError> {
        info!("Creating wallet");
        let mnemonic = generate_mnemonic(words)?;
        let wallet = self.import_wallet(name, &mnemonic, KeyType::Mnemonic, password).await?;
        Ok(CreatedWallet { wallet, mnemonic })
    }

    /// Imports a mnemonic, or an arbitrary secret for BioForest-only
    /// wallets.
    pub async fn import_wallet(
        &self,
        name: &str,
        secret: &WalletSecret,
        key_type: KeyType,
        password: &WalletSecret,
    ) -> Result<Wallet, WalletError> {
        let name = Self::validate_name(name)?;
        validate_password(password.expose(), &self.policy)?;

        let secret = match key_type {
            KeyType::Mnemonic => WalletSecret::new(parse_mnemonic(secret.expose())?.to_string()),
            KeyType::Arbitrary => {
                if secret.is_empty() {
                    return Err(WalletError::ValidationError("secret must not be empty".into()));
                }
                secret.duplicate()
            }
        };

        let derived = derive_addresses(&secret, key_type, &self.chains)?;
        let primary = derived
            .first()
            .ok_or_else(|| WalletError::ValidationError("no configured chain can use this secret".into()))?
            .clone();

        let id = Uuid::new_v4().to_string();
        let secret_ref = Self::secret_ref(&id);
        let wallet = Wallet {
            id: id.clone(),
            name,
            key_type,
            primary_chain: primary.chain_id.clone(),
            primary_address: primary.address.clone(),
            secret_ref: secret_ref.clone(),
            chain_addresses: derived
                .into_iter()
                .map(|d| ChainAddress { wallet_id: id.clone(), chain_id: d.chain_id, address: d.address, assets: Vec::new() })
                .collect(),
            created_at: Utc::now(),
        };

        self.secrets
            .store(&secret_ref, &secret, &StoreOptions::with_password(password))
            .await?;
        if let Err(e) = self.wallets.insert_wallet(&wallet).await {
            // leave no orphaned secret behind
            if let Err(cleanup) = self.secrets.delete(&secret_ref).await {
                warn!(wallet_id = %id, "Failed to remove secret after insert failure: {}", cleanup);
            }
            return Err(e);
        }

        info!(
            wallet_id = %wallet.id,
            key_type = key_type.as_str(),
            chains = wallet.chain_addresses.len(),
            "Wallet stored"
        );
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>, WalletError> {
        self.wallets.get_wallet(wallet_id).await
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>, WalletError> {
        self.wallets.list_wallets().await
    }

    pub async fn rename_wallet(&self, wallet_id: &str, name: &str) -> Result<(), WalletError> {
        let name = Self::validate_name(name)?;
        self.wallets.rename_wallet(wallet_id, &name).await?;
        info!(wallet_id, "Wallet renamed");
        Ok(())
    }

    /// Decrypts with `old` and re-encrypts with `new`. A wrong `old`
    /// password fails with `DecryptionFailed` and changes nothing.
    pub async fn change_password(
        &self,
        wallet_id: &str,
        old: &WalletSecret,
        new: &WalletSecret,
    ) -> Result<(), WalletError> {
        validate_password(new.expose(), &self.policy)?;
        let wallet = self.require(wallet_id).await?;

        let secret = self
            .secrets
            .retrieve(&wallet.secret_ref, &StoreOptions::with_password(old))
            .await?
            .ok_or_else(|| WalletError::NotFoundError(format!("secret for wallet {}", wallet_id)))?;
        self.secrets
            .store(&wallet.secret_ref, &secret, &StoreOptions::with_password(new))
            .await?;

        info!(wallet_id, "Wallet password changed");
        Ok(())
    }

    /// Removes the wallet, its chain addresses and its secret. Pending
    /// transaction history is kept.
    pub async fn delete_wallet(&self, wallet_id: &str) -> Result<bool, WalletError> {
        let wallet = match self.wallets.get_wallet(wallet_id).await? {
            Some(wallet) => wallet,
            None => return Ok(false),
        };
        self.wallets.delete_wallet(wallet_id).await?;
        if !self.secrets.delete(&wallet.secret_ref).await? {
            warn!(wallet_id, "Wallet had no stored secret");
        }
        Ok(true)
    }

    /// Fetches native balances for every chain address that has an adapter
    /// and stores them as the address's assets. Chains that fail keep their
    /// previous assets.
    pub async fn refresh_balances(&self, wallet_id: &str) -> Result<Vec<ChainAddress>, WalletError> {
        let wallet = self.require(wallet_id).await?;
        let lookups = wallet.chain_addresses.iter().map(|address| {
            let adapter = self.registry.get_adapter(&address.chain_id);
            async move {
                match adapter {
                    Some(adapter) => Some(adapter.asset().get_native_balance(&address.address).await),
                    None => None,
                }
            }
        });
        let balances = join_all(lookups).await;

        let mut refreshed = Vec::with_capacity(wallet.chain_addresses.len());
        for (mut address, balance) in wallet.chain_addresses.into_iter().zip(balances) {
            let Some(balance) = balance else {
                debug!(chain = %address.chain_id, "No adapter configured, skipping balance");
                refreshed.push(address);
                continue;
            };

            match balance {
                Ok(amount) => {
                    let native = AssetBalance { symbol: amount.symbol().to_string(), token_address: None, amount };
                    let mut assets: Vec<AssetBalance> =
                        address.assets.into_iter().filter(|a| a.token_address.is_some()).collect();
                    assets.insert(0, native);
                    self.wallets.update_assets(wallet_id, &address.chain_id, &assets).await?;
                    address.assets = assets;
                }
                Err(e) => warn!(chain = %address.chain_id, "Balance refresh failed: {}", e),
            }
            refreshed.push(address);
        }
        Ok(refreshed)
    }

    async fn require(&self, wallet_id: &str) -> Result<Wallet, WalletError> {
        self.wallets
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| WalletError::NotFoundError(format!("wallet {}", wallet_id)))
    }
}
