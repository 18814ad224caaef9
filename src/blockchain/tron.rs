//! Tron adapter over the TronGrid HTTP API.
//!
//! Transactions are created by the node (`createtransaction` /
//! `triggersmartcontract`) and signed locally. Before signing, the `txID`
//! returned by the node is checked against SHA-256 of `raw_data_hex`, and
//! `raw_data_hex` must carry the intended owner, recipient (or token
//! contract) and amount (or `transfer` calldata). A node cannot get us to
//! sign a transfer other than the one requested.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::http::RestClient;
use super::traits::{
    ensure_native_units, AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial,
    SignedTransaction, TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
use crate::core::abi;
use crate::core::amount::Amount;
use crate::core::bip44;
use crate::core::domain::{ChainConfig, ChainKind};
use crate::core::errors::{TxBuildReason, WalletError};
use crate::core::validation::{tron_address_bytes, validate_tron_address};

/// Upper bound on TRX burnt by a TRC-20 call, in sun.
pub const TRC20_FEE_LIMIT: u64 = 100_000_000;
/// Bandwidth bytes of a signed TRX transfer.
const NATIVE_TX_BYTES: u64 = 270;
/// Bandwidth bytes of a signed TRC-20 transfer.
const TOKEN_TX_BYTES: u64 = 345;
/// Energy of a TRC-20 `transfer` to a holder address.
const TRC20_TRANSFER_ENERGY: u64 = 65_000;
const SUN_PER_BANDWIDTH_BYTE: u64 = 1_000;
const SUN_PER_ENERGY: u64 = 420;
/// Activation fee charged when TRX is sent to a new account.
const ACCOUNT_CREATION_FEE: u64 = 1_100_000;

/// Node-built transaction as returned by TronGrid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TronTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub raw_data: Value,
    pub raw_data_hex: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AccountResource {
    #[serde(rename = "freeNetUsed", default)]
    free_net_used: u64,
    #[serde(rename = "freeNetLimit", default)]
    free_net_limit: u64,
    #[serde(rename = "NetUsed", default)]
    net_used: u64,
    #[serde(rename = "NetLimit", default)]
    net_limit: u64,
    #[serde(rename = "EnergyUsed", default)]
    energy_used: u64,
    #[serde(rename = "EnergyLimit", default)]
    energy_limit: u64,
}

impl AccountResource {
    fn bandwidth_available(&self) -> u64 {
        self.free_net_limit.saturating_sub(self.free_net_used) + self.net_limit.saturating_sub(self.net_used)
    }

    fn energy_available(&self) -> u64 {
        self.energy_limit.saturating_sub(self.energy_used)
    }
}

/// Maps TronGrid's free-text rejection to a build reason.
fn classify_rejection(message: &str) -> TxBuildReason {
    let lower = message.to_ascii_lowercase();
    if lower.contains("yourself") {
        TxBuildReason::SelfTransfer
    } else if lower.contains("no owneraccount") || lower.contains("does not exist") {
        TxBuildReason::AccountNotFound
    } else if lower.contains("balance is not sufficient") || lower.contains("insufficient") {
        TxBuildReason::InsufficientFunds
    } else if lower.contains("invalid toaddress") {
        TxBuildReason::InvalidRecipient
    } else {
        TxBuildReason::Rejected("TRON_REJECTED".into())
    }
}

/// TronGrid hex-encodes broadcast error messages.
fn decode_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

pub struct TronAdapter {
    rest: RestClient,
    config: ChainConfig,
}

impl TronAdapter {
    pub fn new(config: ChainConfig) -> Result<Self, WalletError> {
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| WalletError::ConfigError(format!("{} has no rpc_url", config.id)))?;
        Ok(Self { rest: RestClient::new(url)?, config })
    }

    fn sun(&self, value: u64) -> Amount {
        Amount::from_raw(value as u128, self.config.decimals, &self.config.symbol)
    }

    async fn get_account(&self, address: &str) -> Result<Value, WalletError> {
        self.rest
            .post_json("wallet/getaccount", &json!({ "address": address, "visible": true }))
            .await
    }

    async fn account_exists(&self, address: &str) -> Result<bool, WalletError> {
        let account = self.get_account(address).await?;
        Ok(account.as_object().map(|o| !o.is_empty()).unwrap_or(false))
    }

    async fn account_resource(&self, address: &str) -> Result<AccountResource, WalletError> {
        self.rest
            .post_json("wallet/getaccountresource", &json!({ "address": address, "visible": true }))
            .await
    }

    fn transfer_parameter(to: &str, amount: u128) -> Result<String, WalletError> {
        let to_bytes = tron_address_bytes(to)?;
        let mut evm = [0u8; 20];
        evm.copy_from_slice(&to_bytes[1..]);
        Ok(hex::encode(abi::token_transfer_params(&evm, amount)))
    }

    fn parse_created(&self, response: Value) -> Result<TronTransaction, WalletError> {
        if let Some(err) = response.get("Error").and_then(Value::as_str) {
            warn!(chain = %self.config.id, "Node refused to create transaction: {}", err);
            return Err(WalletError::build_failed(classify_rejection(err), err.to_string()));
        }
        Ok(serde_json::from_value(response)?)
    }

    async fn create_native(&self, intent: &TransferIntent) -> Result<TronTransaction, WalletError> {
        let amount = u64::try_from(intent.amount.raw())
            .map_err(|_| WalletError::InvalidAmount("amount exceeds sun range".into()))?;
        let mut body = json!({
            "owner_address": intent.from,
            "to_address": intent.to,
            "amount": amount,
            "visible": true,
        });
        if let Some(memo) = &intent.memo {
            body["extra_data"] = Value::String(hex::encode(memo.as_bytes()));
        }
        let response: Value = self.rest.post_json("wallet/createtransaction", &body).await?;
        self.parse_created(response)
    }

    async fn create_token(&self, intent: &TransferIntent, contract: &str) -> Result<TronTransaction, WalletError> {
        let body = json!({
            "owner_address": intent.from,
            "contract_address": contract,
            "function_selector": abi::ERC20_TRANSFER_SIGNATURE,
            "parameter": Self::transfer_parameter(&intent.to, intent.amount.raw())?,
            "fee_limit": TRC20_FEE_LIMIT,
            "call_value": 0,
            "visible": true,
        });
        let response: Value = self.rest.post_json("wallet/triggersmartcontract", &body).await?;

        let ok = response.pointer("/result/result").and_then(Value::as_bool).unwrap_or(false);
        if !ok {
            let message = response
                .pointer("/result/message")
                .and_then(Value::as_str)
                .map(decode_message)
                .unwrap_or_else(|| "contract call rejected".to_string());
            return Err(WalletError::build_failed(classify_rejection(&message), message));
        }
        let tx = response
            .get("transaction")
            .cloned()
            .ok_or_else(|| WalletError::NetworkError("triggersmartcontract returned no transaction".into()))?;
        self.parse_created(tx)
    }
}

/// Protobuf base-128 varint.
fn varint(mut value: u128) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Byte strings the signed `raw_data_hex` must contain for `intent`.
fn expected_fragments(intent: &TransferIntent) -> Result<Vec<Vec<u8>>, WalletError> {
    let owner = tron_address_bytes(&intent.from)?;
    let to = tron_address_bytes(&intent.to)?;
    match &intent.token_address {
        None => {
            let mut fragments = vec![owner.to_vec(), to.to_vec()];
            let raw = intent.amount.raw();
            // proto3 drops zero-valued fields
            if raw > 0 {
                // TransferContract.amount: field 3, varint
                let mut amount = vec![0x18];
                amount.extend(varint(raw));
                fragments.push(amount);
            }
            Ok(fragments)
        }
        Some(contract) => {
            let mut evm = [0u8; 20];
            evm.copy_from_slice(&to[1..]);
            Ok(vec![
                owner.to_vec(),
                tron_address_bytes(contract)?.to_vec(),
                abi::erc20_transfer_calldata(&evm, intent.amount.raw()),
            ])
        }
    }
}

/// Checks that the bytes about to be signed describe `intent`.
pub fn verify_raw_matches_intent(tx: &TronTransaction, intent: &TransferIntent) -> Result<(), WalletError> {
    let raw = hex::decode(&tx.raw_data_hex)
        .map_err(|e| WalletError::SerializationError(format!("bad raw_data_hex: {}", e)))?;
    for fragment in expected_fragments(intent)? {
        if !contains(&raw, &fragment) {
            warn!(tx_id = %tx.tx_id, "Node-built transaction does not match the requested transfer");
            return Err(WalletError::SigningFailed(
                "node-built transaction does not match the requested transfer".into(),
            ));
        }
    }
    Ok(())
}

/// Signs a node-built transaction after checking its id.
pub fn sign_tron_transaction(tx: &TronTransaction, signing_key: &SigningKey) -> Result<String, WalletError> {
    let raw = hex::decode(&tx.raw_data_hex)
        .map_err(|e| WalletError::SerializationError(format!("bad raw_data_hex: {}", e)))?;
    let digest: [u8; 32] = Sha256::digest(&raw).into();
    if hex::encode(digest) != tx.tx_id.to_ascii_lowercase() {
        return Err(WalletError::SigningFailed("txID does not match raw_data_hex".into()));
    }
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
    let mut out = signature.to_bytes().to_vec();
    out.push(recovery_id.to_byte() + 27);
    Ok(hex::encode(out))
}

impl IdentityService for TronAdapter {
    fn is_valid_address(&self, address: &str) -> bool {
        validate_tron_address(address).is_ok()
    }
}

#[async_trait]
impl AssetService for TronAdapter {
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError> {
        let account = self.get_account(address).await?;
        let balance = account.get("balance").and_then(Value::as_u64).unwrap_or(0);
        Ok(self.sun(balance))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        token_address: &str,
        decimals: u8,
        symbol: &str,
    ) -> Result<Amount, WalletError> {
        let owner = tron_address_bytes(address)?;
        let mut evm = [0u8; 20];
        evm.copy_from_slice(&owner[1..]);
        let body = json!({
            "owner_address": address,
            "contract_address": token_address,
            "function_selector": "balanceOf(address)",
            "parameter": hex::encode(abi::abi_word_address(&evm)),
            "visible": true,
        });
        let response: Value = self.rest.post_json("wallet/triggerconstantcontract", &body).await?;
        let word = response
            .pointer("/constant_result/0")
            .and_then(Value::as_str)
            .ok_or_else(|| WalletError::NetworkError("balanceOf returned no result".into()))?;
        // uint256 words; anything above u128 is not a real balance
        let trimmed = word.trim_start_matches('0');
        let raw = if trimmed.is_empty() {
            0
        } else {
            u128::from_str_radix(trimmed, 16)
                .map_err(|e| WalletError::NetworkError(format!("bad balanceOf result: {}", e)))?
        };
        Ok(Amount::from_raw(raw, decimals, symbol))
    }
}

#[async_trait]
impl TransactionService for TronAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate, WalletError> {
        let resource = self.account_resource(&intent.from).await?;
        let (bytes, energy) = if intent.is_native() {
            (NATIVE_TX_BYTES, 0)
        } else {
            (TOKEN_TX_BYTES, TRC20_TRANSFER_ENERGY)
        };

        let mut fee = 0u64;
        if resource.bandwidth_available() < bytes {
            fee += bytes * SUN_PER_BANDWIDTH_BYTE;
        }
        fee += energy.saturating_sub(resource.energy_available()) * SUN_PER_ENERGY;
        if intent.is_native() && !self.account_exists(&intent.to).await? {
            fee += ACCOUNT_CREATION_FEE;
        }
        debug!(chain = %self.config.id, fee_sun = fee, "Estimated Tron fee");
        Ok(FeeEstimate { standard: self.sun(fee) })
    }

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError> {
        ensure_native_units(&self.config, intent)?;
        if !self.is_valid_address(&intent.to) {
            return Err(WalletError::build_failed(TxBuildReason::InvalidRecipient, intent.to.clone()));
        }
        let tx = match &intent.token_address {
            None => self.create_native(intent).await?,
            Some(contract) => self.create_token(intent, contract).await?,
        };
        debug!(chain = %self.config.id, tx_id = %tx.tx_id, "Built Tron transaction");
        Ok(UnsignedTransaction {
            chain_id: self.config.id.clone(),
            intent: intent.clone(),
            payload: serde_json::to_value(&tx)?,
        })
    }

    async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        key: &KeyMaterial<'_>,
    ) -> Result<SignedTransaction, WalletError> {
        let mut tx: TronTransaction = serde_json::from_value(unsigned.payload.clone())?;
        let derived = bip44::derive_key(key.secret, ChainKind::Tron, 0, 0)?;
        if derived.address != unsigned.intent.from {
            return Err(WalletError::SigningFailed("key does not match sender address".into()));
        }
        let signing_key = derived
            .private_key
            .with_secret(|k| SigningKey::from_slice(k))
            .map_err(|e| WalletError::SigningFailed(format!("Invalid private key: {}", e)))?;

        verify_raw_matches_intent(&tx, &unsigned.intent)?;
        tx.signature = vec![sign_tron_transaction(&tx, &signing_key)?];
        tx.visible = Some(true);
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: serde_json::to_string(&tx)?,
            tx_hash: Some(tx.tx_id.clone()),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError> {
        let tx: Value = serde_json::from_str(&signed.raw)?;
        let response: Value = self.rest.post_json("wallet/broadcasttransaction", &tx).await?;

        if response.get("result").and_then(Value::as_bool) == Some(true) {
            let txid = response
                .get("txid")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| signed.tx_hash.clone())
                .ok_or_else(|| WalletError::NetworkError("broadcast returned no txid".into()))?;
            info!(chain = %self.config.id, tx_hash = %txid, "Transaction sent");
            return Ok(txid);
        }

        let code = response.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN").to_string();
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .map(decode_message)
            .unwrap_or_default();
        warn!(chain = %self.config.id, code = %code, "Broadcast rejected: {}", message);
        Err(WalletError::broadcast_failed(code, message))
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError> {
        let info: Value = self
            .rest
            .post_json("wallet/gettransactioninfobyid", &json!({ "value": tx_hash }))
            .await?;

        if info.get("blockNumber").is_some() {
            let failed = info.get("result").and_then(Value::as_str) == Some("FAILED")
                || info
                    .pointer("/receipt/result")
                    .and_then(Value::as_str)
                    .map(|r| r != "SUCCESS")
                    .unwrap_or(false);
            return Ok(if failed { TransactionStatus::Failed } else { TransactionStatus::Confirmed });
        }

        let tx: Value = self
            .rest
            .post_json("wallet/gettransactionbyid", &json!({ "value": tx_hash }))
            .await?;
        let known = tx.as_object().map(|o| !o.is_empty()).unwrap_or(false);
        Ok(if known { TransactionStatus::Pending } else { TransactionStatus::Unknown })
    }
}

impl ChainAdapter for TronAdapter {
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
