use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::domain::{ChainConfig, ChainKind};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "WALLET_CONFIG";

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// PBKDF2 iteration count
    #[serde(default = "SecurityConfig::default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,

    /// Minimum wallet password length
    #[serde(default = "SecurityConfig::default_min_password_length")]
    pub min_password_length: usize,
}

impl SecurityConfig {
    fn default_pbkdf2_iterations() -> u32 { 100_000 }
    fn default_min_password_length() -> usize { 8 }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: Self::default_pbkdf2_iterations(),
            min_password_length: Self::default_min_password_length(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: Option<u32>,
    pub connection_timeout_seconds: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/wallet.db?mode=rwc".to_string(),
            max_connections: Some(5),
            connection_timeout_seconds: Some(30),
        }
    }
}

/// Top-level wallet engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "WalletConfig::default_chains")]
    pub chains: Vec<ChainConfig>,
}

impl WalletConfig {
    /// Built-in chain set used when the config names none.
    pub fn default_chains() -> Vec<ChainConfig> {
        vec![
            ChainConfig {
                id: "ethereum".to_string(),
                kind: ChainKind::Evm,
                name: "Ethereum".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
                prefix: None,
                evm_chain_id: Some(1),
                rpc_url: Some("https://eth.llamarpc.com".to_string()),
            },
            ChainConfig {
                id: "binance".to_string(),
                kind: ChainKind::Evm,
                name: "BNB Smart Chain".to_string(),
                symbol: "BNB".to_string(),
                decimals: 18,
                prefix: None,
                evm_chain_id: Some(56),
                rpc_url: Some("https://bsc-dataseed.binance.org".to_string()),
            },
            ChainConfig {
                id: "tron".to_string(),
                kind: ChainKind::Tron,
                name: "Tron".to_string(),
                symbol: "TRX".to_string(),
                decimals: 6,
                prefix: None,
                evm_chain_id: None,
                rpc_url: Some("https://api.trongrid.io".to_string()),
            },
            ChainConfig {
                id: "bitcoin".to_string(),
                kind: ChainKind::Bitcoin,
                name: "Bitcoin".to_string(),
                symbol: "BTC".to_string(),
                decimals: 8,
                prefix: None,
                evm_chain_id: None,
                rpc_url: Some("https://blockstream.info/api".to_string()),
            },
            ChainConfig {
                id: "bfmeta".to_string(),
                kind: ChainKind::BioForest,
                name: "BFMeta".to_string(),
                symbol: "BFM".to_string(),
                decimals: 8,
                prefix: Some("b".to_string()),
                evm_chain_id: None,
                rpc_url: Some("https://api.bfmeta.info".to_string()),
            },
        ]
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: WalletConfig = toml::from_str(content).context("invalid wallet config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Loads from `WALLET_CONFIG` when set, otherwise falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "loading wallet config");
                Self::from_toml_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Rejects configs the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.security.pbkdf2_iterations < crate::security::encryption::MIN_PBKDF2_ITERATIONS {
            anyhow::bail!(
                "pbkdf2_iterations must be at least {}",
                crate::security::encryption::MIN_PBKDF2_ITERATIONS
            );
        }
        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id.as_str()) {
                anyhow::bail!("duplicate chain id: {}", chain.id);
            }
            if chain.kind == ChainKind::BioForest && chain.prefix.is_none() {
                anyhow::bail!("bioforest chain {} needs an address prefix", chain.id);
            }
        }
        Ok(())
    }

    pub fn chain(&self, id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == id)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            chains: Self::default_chains(),
        }
    }
}
