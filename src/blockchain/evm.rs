use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    prelude::JsonRpcClient,
    providers::{Http, Middleware, Provider, RpcError},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, TransactionRequest,
        H256, U256, U64,
    },
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::traits::{
    ensure_native_units, AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial,
    SignedTransaction, TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
use crate::core::abi;
use crate::core::amount::Amount;
use crate::core::bip44;
use crate::core::domain::{ChainConfig, ChainKind};
use crate::core::errors::{TxBuildReason, WalletError};
use crate::core::validation::validate_evm_address;

pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;

/// Fields needed to rebuild the legacy transaction at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTxPayload {
    pub from: String,
    pub to: String,
    /// Wei, decimal string
    pub value: String,
    /// Calldata hex with 0x prefix, "0x" for plain transfers
    pub data: String,
    pub nonce: u64,
    /// Wei, decimal string
    pub gas_price: String,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl EvmTxPayload {
    fn to_typed(&self) -> Result<TypedTransaction, WalletError> {
        let from = parse_address(&self.from)?;
        let to = parse_address(&self.to)?;
        let value = U256::from_dec_str(&self.value)
            .map_err(|e| WalletError::SerializationError(format!("bad value: {}", e)))?;
        let gas_price = U256::from_dec_str(&self.gas_price)
            .map_err(|e| WalletError::SerializationError(format!("bad gas price: {}", e)))?;
        let data = hex::decode(self.data.trim_start_matches("0x"))
            .map_err(|e| WalletError::SerializationError(format!("bad calldata: {}", e)))?;
        let request = TransactionRequest::new()
            .from(from)
            .to(to)
            .value(value)
            .data(Bytes::from(data))
            .nonce(self.nonce)
            .gas_price(gas_price)
            .gas(self.gas_limit)
            .chain_id(self.chain_id);
        Ok(TypedTransaction::Legacy(request))
    }
}

fn parse_address(s: &str) -> Result<Address, WalletError> {
    Address::from_str(s).map_err(|e| WalletError::InvalidAddress(format!("{}: {}", s, e)))
}

fn u256_to_u128(v: U256) -> Result<u128, WalletError> {
    if v > U256::from(u128::MAX) {
        return Err(WalletError::InvalidAmount("value exceeds u128".into()));
    }
    Ok(v.as_u128())
}

#[derive(Clone)]
pub struct EvmAdapter<P: JsonRpcClient + Clone = Http> {
    provider: Provider<P>,
    config: ChainConfig,
    chain_id: u64,
}

impl EvmAdapter<Http> {
    pub fn new(config: ChainConfig) -> Result<Self, WalletError> {
        let rpc_url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| WalletError::ConfigError(format!("{} has no rpc_url", config.id)))?
            .trim()
            .to_string();
        let parsed_url = reqwest::Url::parse(&rpc_url).map_err(|e| {
            WalletError::ConfigError(format!("Invalid EVM RPC URL '{}': {}", rpc_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WalletError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        info!(chain = %config.id, "Configuring EVM adapter");
        let provider = Provider::new(Http::new_with_client(parsed_url, client));
        Ok(Self::new_with_provider(config, provider))
    }
}

impl<P> EvmAdapter<P>
where
    P: JsonRpcClient + Clone + Send + Sync + 'static,
{
    /// Builds an adapter over any provider, e.g. a `MockProvider` in tests.
    pub fn new_with_provider(config: ChainConfig, provider: Provider<P>) -> Self {
        let chain_id = config.evm_chain_id.unwrap_or(1);
        Self { provider, config, chain_id }
    }

    pub fn evm_chain_id(&self) -> u64 {
        self.chain_id
    }

    fn native(&self, raw: u128) -> Amount {
        Amount::from_raw(raw, self.config.decimals, &self.config.symbol)
    }

    fn rpc_error(context: &str, err: impl std::fmt::Display) -> WalletError {
        WalletError::NetworkError(format!("{}: {}", context, err))
    }

    async fn gas_price(&self) -> Result<U256, WalletError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| Self::rpc_error("Failed to get gas price", e))
    }

    fn gas_limit_for(intent: &TransferIntent) -> u64 {
        if intent.is_native() {
            NATIVE_TRANSFER_GAS
        } else {
            TOKEN_TRANSFER_GAS
        }
    }

    fn create_wallet(&self, key: &KeyMaterial<'_>, expected_from: &str) -> Result<LocalWallet, WalletError> {
        let derived = bip44::derive_key(key.secret, ChainKind::Evm, 0, 0)?;
        if !derived.address.eq_ignore_ascii_case(expected_from) {
            return Err(WalletError::SigningFailed("key does not match sender address".into()));
        }
        let wallet = derived
            .private_key
            .with_secret(|k| LocalWallet::from_bytes(k))
            .map_err(|e| WalletError::SigningFailed(format!("Invalid private key: {}", e)))?;
        Ok(wallet.with_chain_id(self.chain_id))
    }
}

impl<P> IdentityService for EvmAdapter<P>
where
    P: JsonRpcClient + Clone + Send + Sync + 'static,
{
    fn is_valid_address(&self, address: &str) -> bool {
        validate_evm_address(address).is_ok()
    }
}

#[async_trait]
impl<P> AssetService for EvmAdapter<P>
where
    P: JsonRpcClient + Clone + Send + Sync + 'static,
{
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError> {
        debug!(chain = %self.config.id, "Getting native balance");
        let address = parse_address(address)?;
        let balance = self
            .provider
            .get_balance(address, None)
            .await
            .map_err(|e| Self::rpc_error("Failed to get balance", e))?;
        Ok(self.native(u256_to_u128(balance)?))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        token_address: &str,
        decimals: u8,
        symbol: &str,
    ) -> Result<Amount, WalletError> {
        let owner = abi::parse_evm_address_bytes(address)?;
        let token = parse_address(token_address)?;
        let calldata = abi::abi_pack(
            abi::selector_from_signature("balanceOf(address)"),
            &[abi::abi_word_address(&owner)],
        );
        let call = TypedTransaction::Legacy(TransactionRequest::new().to(token).data(Bytes::from(calldata)));
        let out = self
            .provider
            .call(&call, None)
            .await
            .map_err(|e| Self::rpc_error("balanceOf call failed", e))?;
        if out.len() < 32 {
            return Err(WalletError::NetworkError("short balanceOf response".into()));
        }
        let balance = U256::from_big_endian(&out[..32]);
        Ok(Amount::from_raw(u256_to_u128(balance)?, decimals, symbol))
    }
}

#[async_trait]
impl<P> TransactionService for EvmAdapter<P>
where
    P: JsonRpcClient + Clone + Send + Sync + 'static,
{
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate, WalletError> {
        let gas_price = self.gas_price().await?;
        let total = gas_price
            .checked_mul(U256::from(Self::gas_limit_for(intent)))
            .ok_or_else(|| WalletError::InvalidAmount("fee overflow".into()))?;
        debug!(chain = %self.config.id, fee_wei = %total, "Estimated fee");
        Ok(FeeEstimate { standard: self.native(u256_to_u128(total)?) })
    }

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError> {
        ensure_native_units(&self.config, intent)?;
        if !self.is_valid_address(&intent.to) {
            return Err(WalletError::build_failed(TxBuildReason::InvalidRecipient, intent.to.clone()));
        }
        let from = parse_address(&intent.from)?;

        let (to, value, data) = match &intent.token_address {
            None => (intent.to.clone(), intent.amount.raw(), Vec::new()),
            Some(token) => {
                let recipient = abi::parse_evm_address_bytes(&intent.to)?;
                (token.clone(), 0u128, abi::erc20_transfer_calldata(&recipient, intent.amount.raw()))
            }
        };

        // pending count, so queued sends from this account get fresh nonces
        let nonce = self
            .provider
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| Self::rpc_error("Failed to get nonce", e))?;
        let gas_price = self.gas_price().await?;

        let payload = EvmTxPayload {
            from: intent.from.clone(),
            to,
            value: value.to_string(),
            data: format!("0x{}", hex::encode(&data)),
            nonce: nonce.low_u64(),
            gas_price: gas_price.to_string(),
            gas_limit: Self::gas_limit_for(intent),
            chain_id: self.chain_id,
        };
        debug!(chain = %self.config.id, nonce = payload.nonce, "Built EVM transaction");
        Ok(UnsignedTransaction {
            chain_id: self.config.id.clone(),
            intent: intent.clone(),
            payload: serde_json::to_value(&payload)?,
        })
    }

    async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        key: &KeyMaterial<'_>,
    ) -> Result<SignedTransaction, WalletError> {
        let payload: EvmTxPayload = serde_json::from_value(unsigned.payload.clone())?;
        let tx = payload.to_typed()?;
        let wallet = self.create_wallet(key, &payload.from)?;
        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let hash = keccak256(&raw);
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: format!("0x{}", hex::encode(&raw)),
            tx_hash: Some(format!("0x{}", hex::encode(hash))),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError> {
        let raw = hex::decode(signed.raw.trim_start_matches("0x"))
            .map_err(|e| WalletError::SerializationError(format!("bad raw tx: {}", e)))?;
        match self.provider.send_raw_transaction(Bytes::from(raw)).await {
            Ok(pending) => {
                let tx_hash = format!("{:?}", pending.tx_hash());
                info!(chain = %self.config.id, tx_hash = %tx_hash, "Transaction sent");
                Ok(tx_hash)
            }
            Err(e) => {
                warn!(chain = %self.config.id, "Broadcast rejected: {}", e);
                let (code, message) = match e.as_error_response() {
                    Some(resp) => (resp.code.to_string(), resp.message.clone()),
                    None => ("RPC_ERROR".to_string(), e.to_string()),
                };
                Err(WalletError::broadcast_failed(code, message))
            }
        }
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError> {
        let hash = H256::from_str(tx_hash)
            .map_err(|e| WalletError::ValidationError(format!("Invalid transaction hash: {}", e)))?;

        match self.provider.get_transaction_receipt(hash).await {
            Ok(Some(receipt)) => {
                if receipt.status == Some(U64::from(1)) {
                    Ok(TransactionStatus::Confirmed)
                } else {
                    Ok(TransactionStatus::Failed)
                }
            }
            Ok(None) => match self.provider.get_transaction(hash).await {
                Ok(Some(_)) => Ok(TransactionStatus::Pending),
                Ok(None) => Ok(TransactionStatus::Unknown),
                Err(e) => Err(Self::rpc_error("Failed to get transaction", e)),
            },
            Err(e) => Err(Self::rpc_error("Failed to get transaction receipt", e)),
        }
    }
}

impl<P> ChainAdapter for EvmAdapter<P>
where
    P: JsonRpcClient + Clone + Send + Sync + 'static,
{
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn identity(&self) -> &dyn IdentityService {
        self
    }

    fn asset(&self) -> &dyn AssetService {
        self
    }

    fn transaction(&self) -> &dyn TransactionService {
        self
    }
}
