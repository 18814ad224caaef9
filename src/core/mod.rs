pub mod abi;
pub mod amount;
pub mod base58;
pub mod bioforest;
pub mod bip44;
pub mod config;
pub mod derivation;
pub mod domain;
pub mod errors;
pub mod mnemonic;
pub mod validation;

pub use amount::Amount;
pub use config::WalletConfig;
pub use domain::{ChainAddress, ChainConfig, ChainKind, KeyType, Wallet};
pub use errors::{TxBuildReason, WalletError};
