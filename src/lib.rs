//! Multi-chain wallet engine: key derivation for EVM, Bitcoin, Tron and
//! BioForest chains, encrypted secret storage, chain adapters and the
//! send flow with its pending-transaction ledger.

pub mod blockchain;
pub mod cli;
pub mod core;
pub mod security;
pub mod service;
pub mod storage;

pub use crate::core::errors::{Result, WalletError};
