//! Multi-chain address derivation.
//!
//! One secret and N chain configs give one address per config. Keys are
//! derived once per chain family: every EVM chain shares the m/44'/60' key
//! and every BioForest chain shares the SHA-256 keypair.
//!
//! ## Security
//! - Private keys only live for the duration of the call
//! - Only addresses leave this module

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::bioforest::BioforestKeypair;
use crate::core::bip44;
use crate::core::domain::{ChainConfig, ChainKind, DerivedAddress, KeyType};
use crate::core::errors::WalletError;
use crate::security::secret::WalletSecret;

/// Derives the primary address (account 0, index 0) for every config.
///
/// Output keeps input order. `custom` chains, and BIP44 chains for an
/// arbitrary-string secret, are skipped with a warning.
pub fn derive_addresses(
    secret: &WalletSecret,
    key_type: KeyType,
    configs: &[ChainConfig],
) -> Result<Vec<DerivedAddress>, WalletError> {
    let mut bip44_cache: HashMap<ChainKind, String> = HashMap::new();
    let mut bioforest: Option<BioforestKeypair> = None;
    let mut out = Vec::with_capacity(configs.len());

    for config in configs {
        let address = match config.kind {
            ChainKind::Evm | ChainKind::Tron | ChainKind::Bitcoin => {
                if key_type == KeyType::Arbitrary {
                    warn!(chain = %config.id, "arbitrary secret cannot derive BIP44 chains, skipping");
                    continue;
                }
                match bip44_cache.get(&config.kind) {
                    Some(address) => address.clone(),
                    None => {
                        let key = bip44::derive_key(secret, config.kind, 0, 0)?;
                        bip44_cache.insert(config.kind, key.address.clone());
                        key.address.clone()
                    }
                }
            }
            ChainKind::BioForest => {
                let prefix = config.prefix.as_deref().ok_or_else(|| {
                    WalletError::ConfigError(format!("bioforest chain {} has no prefix", config.id))
                })?;
                let keypair =
                    bioforest.get_or_insert_with(|| BioforestKeypair::from_secret(secret.expose()));
                keypair.address(prefix)
            }
            ChainKind::Custom => {
                warn!(chain = %config.id, "no derivation for custom chain, skipping");
                continue;
            }
        };
        debug!(chain = %config.id, kind = %config.kind, "derived address");
        out.push(DerivedAddress { chain_id: config.id.clone(), kind: config.kind, address });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WalletConfig;
    use pretty_assertions::assert_eq;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn chain(id: &str, kind: ChainKind, prefix: Option<&str>) -> ChainConfig {
        ChainConfig {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            symbol: "X".to_string(),
            decimals: 8,
            prefix: prefix.map(str::to_string),
            evm_chain_id: None,
            rpc_url: None,
        }
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let out = derive_addresses(&WalletSecret::new(ABANDON), KeyType::Mnemonic, &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_default_chains() {
        let config = WalletConfig::default();
        let out = derive_addresses(&WalletSecret::new(ABANDON), KeyType::Mnemonic, &config.chains).unwrap();
        assert_eq!(out.len(), config.chains.len());
        assert_eq!(out[0].address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        // BSC shares the Ethereum key
        assert_eq!(out[1].address, out[0].address);
        assert!(out[2].address.starts_with('T'));
        assert_eq!(out[3].address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert!(out[4].address.starts_with('b'));
    }

    #[test]
    fn test_bioforest_chains_share_payload() {
        let configs = vec![
            chain("bfmeta", ChainKind::BioForest, Some("b")),
            chain("ccchain", ChainKind::BioForest, Some("c")),
        ];
        let out = derive_addresses(&WalletSecret::new("any string"), KeyType::Arbitrary, &configs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].address[1..], &out[1].address[1..]);
    }

    #[test]
    fn test_custom_is_skipped() {
        let configs = vec![
            chain("mystery", ChainKind::Custom, None),
            chain("ethereum", ChainKind::Evm, None),
        ];
        let out = derive_addresses(&WalletSecret::new(ABANDON), KeyType::Mnemonic, &configs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chain_id, "ethereum");
    }

    #[test]
    fn test_arbitrary_secret_skips_bip44() {
        let configs = vec![
            chain("ethereum", ChainKind::Evm, None),
            chain("bfmeta", ChainKind::BioForest, Some("b")),
        ];
        let out = derive_addresses(&WalletSecret::new("not a mnemonic"), KeyType::Arbitrary, &configs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChainKind::BioForest);
    }

    #[test]
    fn test_invalid_mnemonic_fails() {
        let configs = vec![chain("ethereum", ChainKind::Evm, None)];
        let err = derive_addresses(&WalletSecret::new("not a mnemonic"), KeyType::Mnemonic, &configs).unwrap_err();
        assert!(matches!(err, WalletError::InvalidMnemonic(_)));
    }

    #[test]
    fn test_bioforest_without_prefix_is_config_error() {
        let configs = vec![chain("bf", ChainKind::BioForest, None)];
        let err = derive_addresses(&WalletSecret::new("x"), KeyType::Arbitrary, &configs).unwrap_err();
        assert!(matches!(err, WalletError::ConfigError(_)));
    }
}
