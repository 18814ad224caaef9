use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an adapter refused to build a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TxBuildReason {
    /// Sender and recipient are the same account on a chain that forbids it.
    SelfTransfer,
    /// The chain reports that the sender cannot cover amount plus fee.
    InsufficientFunds,
    /// The sending account is not known to the chain.
    AccountNotFound,
    /// The recipient was rejected by the chain.
    InvalidRecipient,
    /// The requested asset cannot be moved by this adapter.
    UnsupportedAsset,
    /// Unmapped chain rejection, carrying the chain's own code.
    Rejected(String),
}

impl TxBuildReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            TxBuildReason::SelfTransfer => "SELF_TRANSFER",
            TxBuildReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TxBuildReason::AccountNotFound => "ACCOUNT_NOT_FOUND",
            TxBuildReason::InvalidRecipient => "INVALID_RECIPIENT",
            TxBuildReason::UnsupportedAsset => "UNSUPPORTED_ASSET",
            TxBuildReason::Rejected(code) => code,
        }
    }
}

impl fmt::Display for TxBuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error type shared by every module of the engine.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Wrong password or tampered ciphertext. Never says which.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Transaction build failed ({reason}): {message}")]
    TxBuildFailed { reason: TxBuildReason, message: String },

    #[error("Broadcast failed ({code}): {message}")]
    BroadcastFailed { code: String, message: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Insufficient fee: {0}")]
    InsufficientFee(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Key derivation error: {0}")]
    KeyDerivationError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WalletError {
    /// Shorthand for a build failure with a message.
    pub fn build_failed(reason: TxBuildReason, message: impl Into<String>) -> Self {
        WalletError::TxBuildFailed { reason, message: message.into() }
    }

    /// Shorthand for a broadcast rejection.
    pub fn broadcast_failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        WalletError::BroadcastFailed { code: code.into(), message: message.into() }
    }

    /// Stable machine-readable code, surfaced to callers of the bridge.
    pub fn code(&self) -> &str {
        match self {
            WalletError::DecryptionFailed => "DECRYPTION_FAILED",
            WalletError::UnsupportedChain(_) => "UNSUPPORTED_CHAIN",
            WalletError::TxBuildFailed { .. } => "TX_BUILD_FAILED",
            WalletError::BroadcastFailed { .. } => "BROADCAST_FAILED",
            WalletError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            WalletError::InsufficientFee(_) => "INSUFFICIENT_FEE",
            WalletError::InvalidMnemonic(_) => "INVALID_MNEMONIC",
            WalletError::InvalidAddress(_) => "INVALID_ADDRESS",
            WalletError::InvalidAmount(_) => "INVALID_AMOUNT",
            WalletError::KeyDerivationError(_) => "KEY_DERIVATION_ERROR",
            WalletError::CryptoError(_) => "CRYPTO_ERROR",
            WalletError::SigningFailed(_) => "SIGNING_FAILED",
            WalletError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            WalletError::StorageError(_) => "STORAGE_ERROR",
            WalletError::NetworkError(_) => "NETWORK_ERROR",
            WalletError::ConfigError(_) => "CONFIG_ERROR",
            WalletError::ValidationError(_) => "VALIDATION_ERROR",
            WalletError::NotFoundError(_) => "NOT_FOUND",
            WalletError::SerializationError(_) => "SERIALIZATION_ERROR",
            WalletError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient failures a caller may retry by hand. Broadcasts are never
    /// retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::NetworkError(_) | WalletError::StorageError(_))
    }

    /// Failures that point at a broken installation rather than bad input.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            WalletError::CryptoError(_) | WalletError::InternalError(_) | WalletError::ConfigError(_)
        )
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::StorageError(err.to_string())
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        WalletError::NetworkError(err.to_string())
    }
}

impl From<toml::de::Error> for WalletError {
    fn from(err: toml::de::Error) -> Self {
        WalletError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
