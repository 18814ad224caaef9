use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::EsploraClient;
use super::transaction::{build_signed, P2wpkhSigner};
use super::utxo::{Utxo, UtxoSelector};
use crate::blockchain::traits::{
    ensure_native_units, AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial,
    SignedTransaction, TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
use crate::core::amount::Amount;
use crate::core::bip44;
use crate::core::domain::{ChainConfig, ChainKind};
use crate::core::errors::{TxBuildReason, WalletError};
use crate::core::validation::validate_bitcoin_address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTxPayload {
    pub from: String,
    pub to: String,
    pub amount_sat: u64,
    pub fee_sat: u64,
    pub change_sat: u64,
    pub inputs: Vec<Utxo>,
}

pub struct BitcoinAdapter {
    client: EsploraClient,
    config: ChainConfig,
    network: Network,
}

impl BitcoinAdapter {
    pub fn new(config: ChainConfig) -> Result<Self, WalletError> {
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| WalletError::ConfigError(format!("{} has no rpc_url", config.id)))?;
        let client = EsploraClient::new(url)?;
        Ok(Self { client, config, network: Network::Bitcoin })
    }

    fn sat(&self, value: u64) -> Amount {
        Amount::from_raw(value as u128, self.config.decimals, &self.config.symbol)
    }

    fn amount_sat(intent: &TransferIntent) -> Result<u64, WalletError> {
        u64::try_from(intent.amount.raw())
            .map_err(|_| WalletError::InvalidAmount("amount exceeds satoshi range".into()))
    }

    fn reject_tokens(intent: &TransferIntent) -> Result<(), WalletError> {
        match &intent.token_address {
            Some(token) => Err(WalletError::build_failed(
                TxBuildReason::UnsupportedAsset,
                format!("bitcoin has no token {}", token),
            )),
            None => Ok(()),
        }
    }
}

impl IdentityService for BitcoinAdapter {
    fn is_valid_address(&self, address: &str) -> bool {
        validate_bitcoin_address(address, self.network).is_ok()
    }
}

#[async_trait]
impl AssetService for BitcoinAdapter {
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError> {
        let sats = self.client.balance(address).await?;
        Ok(self.sat(sats))
    }

    async fn get_token_balance(
        &self,
        _address: &str,
        token_address: &str,
        _decimals: u8,
        _symbol: &str,
    ) -> Result<Amount, WalletError> {
        Err(WalletError::build_failed(
            TxBuildReason::UnsupportedAsset,
            format!("bitcoin has no token {}", token_address),
        ))
    }
}

#[async_trait]
impl TransactionService for BitcoinAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate, WalletError> {
        Self::reject_tokens(intent)?;
        let utxos = self.client.utxos(&intent.from).await?;
        let rate = self.client.fee_rate().await?;
        let target = Self::amount_sat(intent)?;

        // Whole-balance sends fail selection; quote the sweep of every input.
        let fee = match UtxoSelector::select(&utxos, target, rate) {
            Ok(selection) => selection.fee,
            Err(_) => UtxoSelector::estimate_fee(utxos.len().max(1), 2, rate),
        };
        debug!(fee_rate = rate, fee, "Estimated bitcoin fee");
        Ok(FeeEstimate { standard: self.sat(fee) })
    }

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError> {
        Self::reject_tokens(intent)?;
        ensure_native_units(&self.config, intent)?;
        if !self.is_valid_address(&intent.to) {
            return Err(WalletError::build_failed(TxBuildReason::InvalidRecipient, intent.to.clone()));
        }
        let amount_sat = Self::amount_sat(intent)?;
        let utxos = self.client.utxos(&intent.from).await?;
        let rate = self.client.fee_rate().await?;

        let selection = UtxoSelector::select(&utxos, amount_sat, rate).map_err(|e| match e {
            WalletError::InsufficientFunds(msg) => WalletError::build_failed(TxBuildReason::InsufficientFunds, msg),
            other => other,
        })?;

        let payload = BitcoinTxPayload {
            from: intent.from.clone(),
            to: intent.to.clone(),
            amount_sat,
            fee_sat: selection.fee,
            change_sat: selection.change,
            inputs: selection.inputs,
        };
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
        let payload: BitcoinTxPayload = serde_json::from_value(unsigned.payload.clone())?;
        let derived = bip44::derive_key(key.secret, ChainKind::Bitcoin, 0, 0)?;
        let signer = P2wpkhSigner::new(&derived.private_key, self.network)?;
        if signer.address() != payload.from {
            return Err(WalletError::SigningFailed("key does not match sender address".into()));
        }

        let tx = build_signed(
            &signer,
            &payload.inputs,
            &payload.to,
            payload.amount_sat,
            payload.change_sat,
            self.network,
        )?;
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: serialize_hex(&tx),
            tx_hash: Some(tx.txid().to_string()),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError> {
        self.client.broadcast(&signed.raw).await.map_err(|e| {
            warn!(chain = %self.config.id, "Broadcast rejected: {}", e);
            e
        })
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError> {
        self.client.tx_status(tx_hash).await
    }
}

impl ChainAdapter for BitcoinAdapter {
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
    use crate::security::secret::WalletSecret;
    use httpmock::prelude::*;
    use serde_json::json;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const FROM: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
    const TO: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    fn adapter(server: &MockServer) -> BitcoinAdapter {
        BitcoinAdapter::new(ChainConfig {
            id: "bitcoin".into(),
            kind: ChainKind::Bitcoin,
            name: "Bitcoin".into(),
            symbol: "BTC".into(),
            decimals: 8,
            prefix: None,
            evm_chain_id: None,
            rpc_url: Some(server.base_url()),
        })
        .unwrap()
    }

    fn mock_chain(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path(format!("/address/{}/utxo", FROM));
            then.status(200).json_body(json!([
                {"txid": format!("{:064x}", 1), "vout": 0, "value": 80_000, "status": {"confirmed": true}},
                {"txid": format!("{:064x}", 2), "vout": 1, "value": 20_000, "status": {"confirmed": true}}
            ]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/fee-estimates");
            then.status(200).json_body(json!({"6": 2.0}));
        });
    }

    fn intent(sats: u128) -> TransferIntent {
        TransferIntent {
            from: FROM.into(),
            to: TO.into(),
            amount: Amount::from_raw(sats, 8, "BTC"),
            token_address: None,
            memo: None,
        }
    }

    #[tokio::test]
    async fn test_build_and_sign() {
        let server = MockServer::start();
        mock_chain(&server);
        let adapter = adapter(&server);

        let fee = adapter.transaction().estimate_fee(&intent(50_000)).await.unwrap();
        assert_eq!(fee.standard.raw(), UtxoSelector::estimate_fee(1, 2, 2) as u128);

        let unsigned = adapter.transaction().build_transaction(&intent(50_000)).await.unwrap();
        let payload: BitcoinTxPayload = serde_json::from_value(unsigned.payload.clone()).unwrap();
        assert_eq!(payload.inputs.len(), 1);
        assert_eq!(payload.amount_sat + payload.fee_sat + payload.change_sat, 80_000);

        let secret = WalletSecret::new(ABANDON);
        let signed = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&secret))
            .await
            .unwrap();
        assert!(signed.raw.starts_with("02000000"));
        assert_eq!(signed.tx_hash.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_sweep_fee_covers_all_inputs() {
        let server = MockServer::start();
        mock_chain(&server);
        let adapter = adapter(&server);
        let fee = adapter.transaction().estimate_fee(&intent(100_000)).await.unwrap();
        assert_eq!(fee.standard.raw(), UtxoSelector::estimate_fee(2, 2, 2) as u128);

        let adjusted = 100_000 - fee.standard.raw();
        let unsigned = adapter.transaction().build_transaction(&intent(adjusted)).await.unwrap();
        let payload: BitcoinTxPayload = serde_json::from_value(unsigned.payload).unwrap();
        assert_eq!(payload.inputs.len(), 2);
        assert_eq!(payload.change_sat, 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_build_failure() {
        let server = MockServer::start();
        mock_chain(&server);
        let err = adapter(&server).transaction().build_transaction(&intent(500_000)).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::TxBuildFailed { reason: TxBuildReason::InsufficientFunds, .. }
        ));
    }

    #[tokio::test]
    async fn test_tokens_are_unsupported() {
        let server = MockServer::start();
        let mut token = intent(1_000);
        token.token_address = Some("ordinal".into());
        let err = adapter(&server).transaction().build_transaction(&token).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::TxBuildFailed { reason: TxBuildReason::UnsupportedAsset, .. }
        ));
    }

    #[tokio::test]
    async fn test_sign_with_other_secret_fails() {
        let server = MockServer::start();
        mock_chain(&server);
        let adapter = adapter(&server);
        let unsigned = adapter.transaction().build_transaction(&intent(50_000)).await.unwrap();
        let other = WalletSecret::new("legal winner thank year wave sausage worth useful legal winner thank yellow");
        let err = adapter
            .transaction()
            .sign_transaction(&unsigned, &KeyMaterial::new(&other))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::SigningFailed(_)));
    }
}
