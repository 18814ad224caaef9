//! Chain id → adapter lookup.
//!
//! The registry is built once and handed to the services that need it.
//! `configure` and `register` can be called repeatedly with the same input
//! without rebuilding adapters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::bioforest::BioforestAdapter;
use super::bitcoin::BitcoinAdapter;
use super::evm::EvmAdapter;
use super::traits::ChainAdapter;
use super::tron::TronAdapter;
use crate::core::domain::{ChainConfig, ChainKind};
use crate::core::errors::WalletError;

/// Builds an adapter for a chain config.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>, WalletError>;
}

/// Network-backed adapters for every supported chain kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>, WalletError> {
        let adapter: Arc<dyn ChainAdapter> = match config.kind {
            ChainKind::Evm => Arc::new(EvmAdapter::new(config.clone())?),
            ChainKind::Tron => Arc::new(TronAdapter::new(config.clone())?),
            ChainKind::Bitcoin => Arc::new(BitcoinAdapter::new(config.clone())?),
            ChainKind::BioForest => Arc::new(BioforestAdapter::new(config.clone())?),
            ChainKind::Custom => return Err(WalletError::UnsupportedChain(config.id.clone())),
        };
        Ok(adapter)
    }
}

struct Entry {
    config: ChainConfig,
    adapter: Arc<dyn ChainAdapter>,
}

pub struct ChainAdapterRegistry {
    factory: Arc<dyn AdapterFactory>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for ChainAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainAdapterRegistry {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultAdapterFactory))
    }

    pub fn with_factory(factory: Arc<dyn AdapterFactory>) -> Self {
        Self { factory, entries: RwLock::new(HashMap::new()) }
    }

    /// Creates adapters for `configs`. Chains already configured with an
    /// identical config are left alone; `custom` chains are skipped.
    /// Returns how many adapters were (re)built.
    pub fn configure(&self, configs: &[ChainConfig]) -> Result<usize, WalletError> {
        let mut built = 0;
        for config in configs {
            if config.kind == ChainKind::Custom {
                warn!(chain = %config.id, "no adapter for custom chain, skipping");
                continue;
            }
            let unchanged = self
                .entries
                .read()
                .get(&config.id)
                .map(|entry| entry.config == *config)
                .unwrap_or(false);
            if unchanged {
                debug!(chain = %config.id, "adapter already configured");
                continue;
            }

            let adapter = self.factory.create(config)?;
            self.entries
                .write()
                .insert(config.id.clone(), Entry { config: config.clone(), adapter });
            info!(chain = %config.id, kind = %config.kind, "Configured chain adapter");
            built += 1;
        }
        Ok(built)
    }

    /// Registers a ready-made adapter under its own chain id, replacing any
    /// adapter with a different config.
    pub fn register(&self, adapter: Arc<dyn ChainAdapter>) {
        let config = adapter.config().clone();
        let mut entries = self.entries.write();
        if entries.get(&config.id).map(|e| e.config == config).unwrap_or(false) {
            return;
        }
        info!(chain = %config.id, "Registered chain adapter");
        entries.insert(config.id.clone(), Entry { config, adapter });
    }

    pub fn get_adapter(&self, chain_id: &str) -> Option<Arc<dyn ChainAdapter>> {
        self.entries.read().get(chain_id).map(|e| Arc::clone(&e.adapter))
    }

    pub fn chain_config(&self, chain_id: &str) -> Option<ChainConfig> {
        self.entries.read().get(chain_id).map(|e| e.config.clone())
    }

    pub fn is_configured(&self, chain_id: &str) -> bool {
        self.entries.read().contains_key(chain_id)
    }

    /// Configured chain ids, sorted.
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn configs(&self) -> Vec<ChainConfig> {
        let entries = self.entries.read();
        let mut configs: Vec<ChainConfig> = entries.values().map(|e| e.config.clone()).collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }
}
