use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::amount::Amount;
use crate::core::domain::{ChainConfig, ChainKind};
use crate::core::errors::WalletError;
use crate::security::secret::WalletSecret;

/// Represents the status of a broadcast transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Unknown,
}

/// What the user asked to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub from: String,
    pub to: String,
    /// In the transferred asset's units (token units for token transfers).
    pub amount: Amount,
    /// Token contract or asset type, `None` for the native asset.
    #[serde(default)]
    pub token_address: Option<String>,
    /// Memo / remark where the chain supports one.
    #[serde(default)]
    pub memo: Option<String>,
}

impl TransferIntent {
    pub fn is_native(&self) -> bool {
        self.token_address.is_none()
    }
}

/// Fee quote, always in the chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub standard: Amount,
}

/// Chain-specific unsigned transaction. `payload` is opaque outside the
/// adapter that built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain_id: String,
    pub intent: TransferIntent,
    pub payload: serde_json::Value,
}

/// Signed, serialized transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub chain_id: String,
    /// Hex for EVM/Bitcoin, JSON for Tron/BioForest.
    pub raw: String,
    /// Hash known before broadcast, when the format allows it.
    pub tx_hash: Option<String>,
}

/// Secrets needed to sign. Borrowed so they never outlive the send call.
pub struct KeyMaterial<'a> {
    pub secret: &'a WalletSecret,
    /// BioForest pay password for the second signature.
    pub pay_password: Option<&'a WalletSecret>,
}

impl<'a> KeyMaterial<'a> {
    pub fn new(secret: &'a WalletSecret) -> Self {
        Self { secret, pay_password: None }
    }

    pub fn with_pay_password(mut self, pay_password: Option<&'a WalletSecret>) -> Self {
        self.pay_password = pay_password;
        self
    }
}

pub trait IdentityService: Send + Sync {
    fn is_valid_address(&self, address: &str) -> bool;
}

#[async_trait]
pub trait AssetService: Send + Sync {
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError>;

    /// Balance of a token held by `address`. `decimals`/`symbol` describe
    /// the token as the caller knows it.
    async fn get_token_balance(
        &self,
        address: &str,
        token_address: &str,
        decimals: u8,
        symbol: &str,
    ) -> Result<Amount, WalletError>;
}

#[async_trait]
pub trait TransactionService: Send + Sync {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate, WalletError>;

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError>;

    async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        key: &KeyMaterial<'_>,
    ) -> Result<SignedTransaction, WalletError>;

    /// Returns the transaction hash. Never retried internally.
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError>;

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError>;

    /// Registered second-signature public key, BioForest only.
    async fn second_public_key(&self, _address: &str) -> Result<Option<String>, WalletError> {
        Ok(None)
    }
}

/// One configured chain. Capabilities are grouped the way callers use them.
pub trait ChainAdapter: Send + Sync {
    fn config(&self) -> &ChainConfig;
    fn identity(&self) -> &dyn IdentityService;
    fn asset(&self) -> &dyn AssetService;
    fn transaction(&self) -> &dyn TransactionService;

    fn chain_id(&self) -> &str {
        &self.config().id
    }

    fn kind(&self) -> ChainKind {
        self.config().kind
    }
}

/// Shared by adapters: rejects intents whose amount is not in the chain's
/// native units when no token is named.
pub(crate) fn ensure_native_units(config: &ChainConfig, intent: &TransferIntent) -> Result<(), WalletError> {
    if intent.is_native() && intent.amount.decimals() != config.decimals {
        return Err(WalletError::InvalidAmount(format!(
            "{} uses {} decimals, got {}",
            config.symbol,
            config.decimals,
            intent.amount.decimals()
        )));
    }
    Ok(())
}
