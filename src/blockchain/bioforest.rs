//! BioForest chain adapter.
//!
//! BioForest transactions are built locally from the latest block and the
//! node's minimum fee, then signed with the wallet's Ed25519 key. Accounts
//! with a registered second public key also need a `signSignature` made
//! with the key derived from the pay password.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::http::RestClient;
use super::traits::{
    ensure_native_units, AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial, SignedTransaction,
    TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
use crate::core::amount::Amount;
use crate::core::bioforest::BioforestKeypair;
use crate::core::domain::ChainConfig;
use crate::core::errors::{TxBuildReason, WalletError};
use crate::core::validation::validate_bioforest_address;

pub const TRANSFER_TYPE: &str = "AST-02";
/// Blocks after `applyBlockHeight` during which the transaction stays valid.
pub const EFFECTIVE_BLOCKS: u64 = 100;

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    #[serde(default)]
    second_public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    amount: String,
}

#[derive(Debug, Deserialize)]
struct LastBlock {
    height: u64,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct TransactionQuery {
    #[serde(default)]
    trs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAsset {
    pub source_chain_name: String,
    pub asset_type: String,
    /// Raw units, decimal string
    pub amount: String,
}

/// Signable body. Field order is the signing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BioforestTransaction {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub sender_id: String,
    pub sender_public_key: String,
    pub recipient_id: String,
    /// Raw units, decimal string
    pub fee: String,
    pub timestamp: u64,
    pub apply_block_height: u64,
    pub effective_block_height: u64,
    #[serde(default)]
    pub remark: Option<String>,
    pub asset: TransferAsset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_signature: Option<String>,
}

impl BioforestTransaction {
    /// SHA-256 of the JSON body without any signature field.
    pub fn signing_digest(&self) -> Result<[u8; 32], WalletError> {
        let mut body = self.clone();
        body.signature = None;
        body.sign_signature = None;
        Ok(Sha256::digest(serde_json::to_vec(&body)?).into())
    }

    /// SHA-256 of the body carrying the first signature, for `signSignature`.
    pub fn second_signing_digest(&self) -> Result<[u8; 32], WalletError> {
        let mut body = self.clone();
        body.sign_signature = None;
        Ok(Sha256::digest(serde_json::to_vec(&body)?).into())
    }
}

/// Unsigned payload: the body plus the second key registered at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioforestTxPayload {
    pub transaction: BioforestTransaction,
    #[serde(default)]
    pub second_public_key: Option<String>,
}

pub struct BioforestAdapter {
    rest: RestClient,
    config: ChainConfig,
    prefix: String,
}

impl BioforestAdapter {
    pub fn new(config: ChainConfig) -> Result<Self, WalletError> {
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| WalletError::ConfigError(format!("{} has no rpc_url", config.id)))?;
        let prefix = config
            .prefix
            .clone()
            .ok_or_else(|| WalletError::ConfigError(format!("bioforest chain {} has no prefix", config.id)))?;
        Ok(Self { rest: RestClient::new(url)?, config, prefix })
    }

    fn path(&self, endpoint: &str) -> String {
        format!("wallet/{}/{}", self.config.id, endpoint)
    }

    fn unwrap_envelope<T>(endpoint: &str, envelope: Envelope<T>) -> Result<Option<T>, WalletError> {
        if envelope.success {
            return Ok(envelope.result);
        }
        let message = envelope
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| format!("{} failed", endpoint));
        Err(WalletError::NetworkError(message))
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<Option<T>, WalletError> {
        let envelope: Envelope<T> = self.rest.post_json(&self.path(endpoint), body).await?;
        Self::unwrap_envelope(endpoint, envelope)
    }

    async fn account_info(&self, address: &str) -> Result<Option<AccountInfo>, WalletError> {
        self.post("address/info", &json!({ "address": address })).await
    }

    async fn last_block(&self) -> Result<LastBlock, WalletError> {
        let envelope: Envelope<LastBlock> = self.rest.get_json(&self.path("lastblock")).await?;
        Self::unwrap_envelope("lastblock", envelope)?
            .ok_or_else(|| WalletError::NetworkError("lastblock returned no block".into()))
    }

    fn asset_type(&self, intent: &TransferIntent) -> String {
        intent.token_address.clone().unwrap_or_else(|| self.config.symbol.clone())
    }

    async fn min_fee(&self, intent: &TransferIntent) -> Result<u128, WalletError> {
        let body = json!({
            "transaction": {
                "type": TRANSFER_TYPE,
                "senderId": intent.from,
                "amount": intent.amount.raw().to_string(),
                "assetType": self.asset_type(intent),
                "remark": intent.memo,
            }
        });
        let fee: Option<String> = self.post("transactions/minfee", &body).await?;
        let fee = fee.ok_or_else(|| WalletError::NetworkError("minfee returned no fee".into()))?;
        fee.parse::<u128>()
            .map_err(|e| WalletError::NetworkError(format!("bad minfee '{}': {}", fee, e)))
    }

    fn native(&self, raw: u128) -> Amount {
        Amount::from_raw(raw, self.config.decimals, &self.config.symbol)
    }
}

impl IdentityService for BioforestAdapter {
    fn is_valid_address(&self, address: &str) -> bool {
        validate_bioforest_address(address, &self.prefix).is_ok()
    }
}

#[async_trait]
impl AssetService for BioforestAdapter {
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError> {
        let symbol = self.config.symbol.clone();
        let amount = self
            .get_token_balance(address, &symbol, self.config.decimals, &symbol)
            .await?;
        Ok(self.native(amount.raw()))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        token_address: &str,
        decimals: u8,
        symbol: &str,
    ) -> Result<Amount, WalletError> {
        let body = json!({ "address": address, "assetType": token_address });
        let balance: Option<BalanceResult> = self.post("address/balance", &body).await?;
        match balance {
            Some(b) => Amount::parse_raw(&b.amount, decimals, symbol),
            None => Ok(Amount::zero(decimals, symbol)),
        }
    }
}

#[async_trait]
impl TransactionService for BioforestAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate, WalletError> {
        let fee = self.min_fee(intent).await?;
        debug!(chain = %self.config.id, fee, "Estimated BioForest fee");
        Ok(FeeEstimate { standard: self.native(fee) })
    }

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError> {
        ensure_native_units(&self.config, intent)?;
        if intent.from == intent.to {
            return Err(WalletError::build_failed(
                TxBuildReason::SelfTransfer,
                "sender and recipient are the same address",
            ));
        }
        if !self.is_valid_address(&intent.to) {
            return Err(WalletError::build_failed(TxBuildReason::InvalidRecipient, intent.to.clone()));
        }
        let account = self.account_info(&intent.from).await?.ok_or_else(|| {
            WalletError::build_failed(TxBuildReason::AccountNotFound, intent.from.clone())
        })?;
        let block = self.last_block().await?;
        let effective_block_height = block.height.checked_add(EFFECTIVE_BLOCKS).ok_or_else(|| {
            WalletError::NetworkError(format!("node reported an impossible block height {}", block.height))
        })?;
        let fee = self.min_fee(intent).await?;

        let transaction = BioforestTransaction {
            tx_type: TRANSFER_TYPE.to_string(),
            sender_id: intent.from.clone(),
            sender_public_key: String::new(),
            recipient_id: intent.to.clone(),
            fee: fee.to_string(),
            timestamp: block.timestamp,
            apply_block_height: block.height,
            effective_block_height,
            remark: intent.memo.clone(),
            asset: TransferAsset {
                source_chain_name: self.config.id.clone(),
                asset_type: self.asset_type(intent),
                amount: intent.amount.raw().to_string(),
            },
            signature: None,
            sign_signature: None,
        };
        let payload = BioforestTxPayload { transaction, second_public_key: account.second_public_key };
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
        let payload: BioforestTxPayload = serde_json::from_value(unsigned.payload.clone())?;
        let mut tx = payload.transaction;

        let keypair = BioforestKeypair::from_secret(key.secret.expose());
        if keypair.address(&self.prefix) != tx.sender_id {
            return Err(WalletError::SigningFailed("key does not match sender address".into()));
        }
        tx.sender_public_key = keypair.public_key_hex();
        tx.signature = Some(keypair.sign_hex(&tx.signing_digest()?));

        if let Some(registered) = &payload.second_public_key {
            let pay_password = key
                .pay_password
                .ok_or_else(|| WalletError::AuthenticationFailed("pay password required".into()))?;
            let second = BioforestKeypair::from_secret(pay_password.expose());
            if !second.public_key_hex().eq_ignore_ascii_case(registered) {
                return Err(WalletError::AuthenticationFailed("pay password does not match".into()));
            }
            tx.sign_signature = Some(second.sign_hex(&tx.second_signing_digest()?));
        }

        let tx_hash = tx.signature.clone();
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: serde_json::to_string(&tx)?,
            tx_hash,
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError> {
        let tx: BioforestTransaction = serde_json::from_str(&signed.raw)?;
        let envelope: Envelope<Value> = self
            .rest
            .post_json(&self.path("transactions/broadcast"), &tx)
            .await?;
        if !envelope.success {
            let (code, message) = match envelope.error {
                Some(e) => {
                    let code = match e.code {
                        Value::String(s) => s,
                        Value::Null => "UNKNOWN".to_string(),
                        other => other.to_string(),
                    };
                    (code, e.message)
                }
                None => ("UNKNOWN".to_string(), "broadcast rejected".to_string()),
            };
            warn!(chain = %self.config.id, code = %code, "Broadcast rejected: {}", message);
            return Err(WalletError::broadcast_failed(code, message));
        }
        let hash = tx
            .signature
            .ok_or_else(|| WalletError::InternalError("broadcasting an unsigned transaction".into()))?;
        info!(chain = %self.config.id, tx_hash = %hash, "Transaction sent");
        Ok(hash)
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError> {
        let query: Option<TransactionQuery> = self
            .post("transactions/query", &json!({ "signature": tx_hash }))
            .await?;
        let found = query.map(|q| !q.trs.is_empty()).unwrap_or(false);
        Ok(if found { TransactionStatus::Confirmed } else { TransactionStatus::Unknown })
    }

    async fn second_public_key(&self, address: &str) -> Result<Option<String>, WalletError> {
        Ok(self.account_info(address).await?.and_then(|info| info.second_public_key))
    }
}

impl ChainAdapter for BioforestAdapter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bioforest::verify;
    use crate::core::domain::ChainKind;
    use crate::security::secret::WalletSecret;
    use httpmock::prelude::*;

    const SECRET: &str = "bioforest test secret";
    const PAY_PASSWORD: &str = "pay pass";

    fn adapter(server: &MockServer) -> BioforestAdapter {
        BioforestAdapter::new(ChainConfig {
            id: "bfmeta".into(),
            kind: ChainKind::BioForest,
            name: "BFMeta".into(),
            symbol: "BFM".into(),
            decimals: 8,
            prefix: Some("b".into()),
            evm_chain_id: None,
            rpc_url: Some(server.base_url()),
        })
        .unwrap()
    }

    fn from() -> String {
        BioforestKeypair::from_secret(SECRET).address("b")
    }

    fn to() -> String {
        BioforestKeypair::from_secret("recipient").address("b")
    }

    fn intent() -> TransferIntent {
        TransferIntent {
            from: from(),
            to: to(),
            amount: Amount::parse("2.5", 8, "BFM").unwrap(),
            token_address: None,
            memo: Some("rent".into()),
        }
    }

    fn mock_chain(server: &MockServer, second_public_key: Option<String>) {
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/address/info");
            then.status(200).json_body(json!({
                "success": true,
                "result": {"address": from(), "secondPublicKey": second_public_key}
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/wallet/bfmeta/lastblock");
            then.status(200).json_body(json!({"success": true, "result": {"height": 1000, "timestamp": 5000}}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/transactions/minfee");
            then.status(200).json_body(json!({"success": true, "result": "250"}));
        });
    }

    #[test]
    fn test_new_requires_prefix() {
        let mut config = ChainConfig {
            id: "bf".into(),
            kind: ChainKind::BioForest,
            name: String::new(),
            symbol: "BF".into(),
            decimals: 8,
            prefix: None,
            evm_chain_id: None,
            rpc_url: Some("http://127.0.0.1:1".into()),
        };
        assert!(matches!(BioforestAdapter::new(config.clone()), Err(WalletError::ConfigError(_))));
        config.prefix = Some("c".into());
        assert!(BioforestAdapter::new(config).is_ok());
    }

    #[tokio::test]
    async fn test_self_transfer_rejected_locally() {
        let server = MockServer::start();
        let mut same = intent();
        same.to = same.from.clone();
        let err = adapter(&server).transaction().build_transaction(&same).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::TxBuildFailed { reason: TxBuildReason::SelfTransfer, .. }
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_foreign_units() {
        let server = MockServer::start();
        let mut wrong = intent();
        wrong.amount = Amount::parse("2.5", 6, "BFM").unwrap();
        let err = adapter(&server).transaction().build_transaction(&wrong).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_build_rejects_overflowing_block_height() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/address/info");
            then.status(200).json_body(json!({"success": true, "result": {"address": from()}}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/wallet/bfmeta/lastblock");
            then.status(200)
                .json_body(json!({"success": true, "result": {"height": u64::MAX, "timestamp": 5000}}));
        });
        let err = adapter(&server).transaction().build_transaction(&intent()).await.unwrap_err();
        assert!(matches!(err, WalletError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_missing_account_is_build_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/address/info");
            then.status(200).json_body(json!({"success": true, "result": null}));
        });
        let err = adapter(&server).transaction().build_transaction(&intent()).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::TxBuildFailed { reason: TxBuildReason::AccountNotFound, .. }
        ));
    }

    #[tokio::test]
    async fn test_build_and_sign_single_signature() {
        let server = MockServer::start();
        mock_chain(&server, None);
        let adapter = adapter(&server);

        let fee = adapter.transaction().estimate_fee(&intent()).await.unwrap();
        assert_eq!(fee.standard.raw(), 250);

        let unsigned = adapter.transaction().build_transaction(&intent()).await.unwrap();
        let secret = WalletSecret::new(SECRET);
        let signed = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&secret))
            .await
            .unwrap();

        let tx: BioforestTransaction = serde_json::from_str(&signed.raw).unwrap();
        assert_eq!(tx.apply_block_height, 1000);
        assert_eq!(tx.effective_block_height, 1000 + EFFECTIVE_BLOCKS);
        assert_eq!(tx.asset.amount, "250000000");
        assert_eq!(tx.remark.as_deref(), Some("rent"));
        assert!(tx.sign_signature.is_none());

        let pk = hex::decode(&tx.sender_public_key).unwrap();
        let sig = hex::decode(tx.signature.as_ref().unwrap()).unwrap();
        assert!(verify(&pk, &tx.signing_digest().unwrap(), &sig).unwrap());
        assert_eq!(signed.tx_hash, tx.signature);
    }

    #[tokio::test]
    async fn test_second_signature_flow() {
        let server = MockServer::start();
        let second_pk = BioforestKeypair::from_secret(PAY_PASSWORD).public_key_hex();
        mock_chain(&server, Some(second_pk.clone()));
        let adapter = adapter(&server);

        assert_eq!(adapter.transaction().second_public_key(&from()).await.unwrap(), Some(second_pk.clone()));

        let unsigned = adapter.transaction().build_transaction(&intent()).await.unwrap();
        let secret = WalletSecret::new(SECRET);

        let missing = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&secret))
            .await
            .unwrap_err();
        assert!(matches!(missing, WalletError::AuthenticationFailed(_)));

        let wrong = WalletSecret::new("wrong pay pass");
        let err = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&secret).with_pay_password(Some(&wrong)))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed(_)));

        let pay = WalletSecret::new(PAY_PASSWORD);
        let signed = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&secret).with_pay_password(Some(&pay)))
            .await
            .unwrap();
        let tx: BioforestTransaction = serde_json::from_str(&signed.raw).unwrap();
        let sign_sig = hex::decode(tx.sign_signature.as_ref().unwrap()).unwrap();
        let second_bytes = hex::decode(&second_pk).unwrap();
        assert!(verify(&second_bytes, &tx.second_signing_digest().unwrap(), &sign_sig).unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_error_carries_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/transactions/broadcast");
            then.status(200).json_body(json!({
                "success": false,
                "error": {"code": "001-00034", "message": "Transaction fee is not enough"}
            }));
        });
        let tx = BioforestTransaction {
            tx_type: TRANSFER_TYPE.into(),
            sender_id: from(),
            sender_public_key: String::new(),
            recipient_id: to(),
            fee: "1".into(),
            timestamp: 0,
            apply_block_height: 1,
            effective_block_height: 101,
            remark: None,
            asset: TransferAsset { source_chain_name: "bfmeta".into(), asset_type: "BFM".into(), amount: "1".into() },
            signature: Some("aa".into()),
            sign_signature: None,
        };
        let signed = SignedTransaction {
            chain_id: "bfmeta".into(),
            raw: serde_json::to_string(&tx).unwrap(),
            tx_hash: Some("aa".into()),
        };
        match adapter(&server).transaction().broadcast_transaction(&signed).await.unwrap_err() {
            WalletError::BroadcastFailed { code, message } => {
                assert_eq!(code, "001-00034");
                assert!(message.contains("fee"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_balance_defaults_to_zero() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/wallet/bfmeta/address/balance");
            then.status(200).json_body(json!({"success": true, "result": null}));
        });
        let balance = adapter(&server).asset().get_native_balance(&from()).await.unwrap();
        assert!(balance.is_zero());
        assert_eq!(balance.symbol(), "BFM");
    }
}
