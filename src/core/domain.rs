use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::core::amount::Amount;
use crate::core::errors::WalletError;

/// Family of chains that share key derivation and transaction format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    BioForest,
    Evm,
    Bitcoin,
    Tron,
    Custom,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::BioForest => "bioforest",
            ChainKind::Evm => "evm",
            ChainKind::Bitcoin => "bitcoin",
            ChainKind::Tron => "tron",
            ChainKind::Custom => "custom",
        }
    }

    /// SLIP-44 coin type for the BIP44 families.
    pub fn coin_type(&self) -> Option<u32> {
        match self {
            ChainKind::Evm => Some(60),
            ChainKind::Bitcoin => Some(0),
            ChainKind::Tron => Some(195),
            ChainKind::BioForest | ChainKind::Custom => None,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bioforest" => Ok(ChainKind::BioForest),
            "evm" => Ok(ChainKind::Evm),
            "bitcoin" => Ok(ChainKind::Bitcoin),
            "tron" => Ok(ChainKind::Tron),
            "custom" => Ok(ChainKind::Custom),
            other => Err(WalletError::UnsupportedChain(other.to_string())),
        }
    }
}

/// Static description of one configured chain. `id` is the dispatch key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: String,
    pub kind: ChainKind,
    #[serde(default)]
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Address prefix, BioForest only.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub evm_chain_id: Option<u64>,
    #[serde(default)]
    pub rpc_url: Option<String>,
}

impl ChainConfig {
    pub fn zero_amount(&self) -> Amount {
        Amount::from_raw(0, self.decimals, &self.symbol)
    }
}

/// How a wallet's secret was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// BIP39 mnemonic, usable on every chain family.
    Mnemonic,
    /// Free-form string, BioForest chains only.
    Arbitrary,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Mnemonic => "mnemonic",
            KeyType::Arbitrary => "arbitrary",
        }
    }
}

impl FromStr for KeyType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mnemonic" => Ok(KeyType::Mnemonic),
            "arbitrary" => Ok(KeyType::Arbitrary),
            other => Err(WalletError::ValidationError(format!("unknown key type: {}", other))),
        }
    }
}

/// Balance of one asset held at a chain address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub symbol: String,
    /// Token contract, `None` for the native asset.
    pub token_address: Option<String>,
    pub amount: Amount,
}

/// Address of a wallet on one chain, keyed `walletId:chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAddress {
    pub wallet_id: String,
    pub chain_id: String,
    pub address: String,
    #[serde(default)]
    pub assets: Vec<AssetBalance>,
}

impl ChainAddress {
    pub fn key(&self) -> String {
        format!("{}:{}", self.wallet_id, self.chain_id)
    }
}

/// Persisted wallet record. The encrypted secret lives behind secure storage
/// under `secret_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub name: String,
    pub key_type: KeyType,
    pub primary_chain: String,
    pub primary_address: String,
    pub secret_ref: String,
    #[serde(default)]
    pub chain_addresses: Vec<ChainAddress>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn address_on(&self, chain_id: &str) -> Option<&ChainAddress> {
        self.chain_addresses.iter().find(|a| a.chain_id == chain_id)
    }
}

/// 32-byte secp256k1 or ed25519 private key, zeroized on drop.
pub struct PrivateKey(Secret<[u8; 32]>);

impl PrivateKey {
    pub fn new(k: [u8; 32]) -> Self {
        PrivateKey(Secret::new(k))
    }

    /// Runs `f` with the raw key bytes without letting them escape.
    pub fn with_secret<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        f(self.0.expose_secret())
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, WalletError> {
        let arr: [u8; 32] = slice
            .try_into()
            .map_err(|_| WalletError::KeyDerivationError("private key must be 32 bytes".into()))?;
        Ok(PrivateKey::new(arr))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Key derived for one chain. Never persisted.
#[derive(Debug)]
pub struct DerivedKey {
    pub chain: ChainKind,
    /// BIP44/BIP84 path; `None` for BioForest.
    pub derivation_path: Option<String>,
    pub private_key: PrivateKey,
    pub public_key: Vec<u8>,
    pub address: String,
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.public_key.zeroize();
    }
}

/// Address produced by the multi-chain derivation facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub chain_id: String,
    pub kind: ChainKind,
    pub address: String,
}
