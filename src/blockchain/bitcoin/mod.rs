//! Bitcoin support: native SegWit (P2WPKH) spends over an Esplora API.

pub mod adapter;
pub mod client;
pub mod transaction;
pub mod utxo;

pub use adapter::{BitcoinAdapter, BitcoinTxPayload};
pub use client::EsploraClient;
pub use utxo::{Selection, Utxo, UtxoSelector};
