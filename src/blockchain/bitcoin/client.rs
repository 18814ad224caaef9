//! Esplora REST client (blockstream.info / mempool.space compatible).

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};

use super::utxo::Utxo;
use crate::blockchain::http::RestClient;
use crate::blockchain::traits::TransactionStatus;
use crate::core::errors::WalletError;

/// Confirmation target used for fee rates, in blocks.
pub const FEE_TARGET_BLOCKS: &str = "6";
const FALLBACK_FEE_RATE: u64 = 10;

#[derive(Debug, Deserialize)]
struct TxoStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: TxoStats,
    mempool_stats: TxoStats,
}

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: UtxoStatus,
}

#[derive(Debug, Deserialize)]
struct TxStatus {
    confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct EsploraClient {
    rest: RestClient,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Result<Self, WalletError> {
        Ok(Self { rest: RestClient::new(base_url)? })
    }

    /// Confirmed plus mempool balance in satoshi.
    pub async fn balance(&self, address: &str) -> Result<u64, WalletError> {
        let info: AddressInfo = self.rest.get_json(&format!("address/{}", address)).await?;
        let funded = info.chain_stats.funded_txo_sum + info.mempool_stats.funded_txo_sum;
        let spent = info.chain_stats.spent_txo_sum + info.mempool_stats.spent_txo_sum;
        Ok(funded.saturating_sub(spent))
    }

    pub async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, WalletError> {
        let raw: Vec<EsploraUtxo> = self.rest.get_json(&format!("address/{}/utxo", address)).await?;
        debug!(count = raw.len(), "Fetched UTXOs");
        Ok(raw
            .into_iter()
            .map(|u| Utxo::new(u.txid, u.vout, u.value, u.status.confirmed))
            .collect())
    }

    /// Fee rate in sat/vB for [`FEE_TARGET_BLOCKS`], rounded up, at least 1.
    pub async fn fee_rate(&self) -> Result<u64, WalletError> {
        let estimates: HashMap<String, f64> = self.rest.get_json("fee-estimates").await?;
        let rate = estimates
            .get(FEE_TARGET_BLOCKS)
            .copied()
            .map(|r| r.ceil() as u64)
            .unwrap_or(FALLBACK_FEE_RATE);
        Ok(rate.max(1))
    }

    /// Broadcasts raw hex. Esplora answers with the txid as plain text, or a
    /// 400 with the node's rejection message.
    pub async fn broadcast(&self, tx_hex: &str) -> Result<String, WalletError> {
        let response = self.rest.post_text("tx", tx_hex.to_string()).await?;
        if !response.status.is_success() {
            return Err(WalletError::broadcast_failed(
                response.status.as_u16().to_string(),
                response.body.trim().to_string(),
            ));
        }
        let txid = response.body.trim().to_string();
        info!(txid = %txid, "Bitcoin transaction broadcast");
        Ok(txid)
    }

    pub async fn tx_status(&self, txid: &str) -> Result<TransactionStatus, WalletError> {
        let response = self.rest.get_raw(&format!("tx/{}/status", txid)).await?;
        if response.status == reqwest::StatusCode::NOT_FOUND {
            return Ok(TransactionStatus::Unknown);
        }
        if !response.status.is_success() {
            return Err(WalletError::NetworkError(format!(
                "tx status returned {}",
                response.status.as_u16()
            )));
        }
        let status: TxStatus = serde_json::from_str(&response.body)?;
        Ok(if status.confirmed { TransactionStatus::Confirmed } else { TransactionStatus::Pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const ADDR: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    #[tokio::test]
    async fn test_balance_includes_mempool() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/address/{}", ADDR));
            then.status(200).json_body(json!({
                "address": ADDR,
                "chain_stats": {"funded_txo_sum": 150_000, "spent_txo_sum": 50_000, "tx_count": 3},
                "mempool_stats": {"funded_txo_sum": 1_000, "spent_txo_sum": 0, "tx_count": 1}
            }));
        });
        let client = EsploraClient::new(&server.base_url()).unwrap();
        assert_eq!(client.balance(ADDR).await.unwrap(), 101_000);
    }

    #[tokio::test]
    async fn test_fee_rate_rounds_up_and_falls_back() {
        let server = MockServer::start();
        let mut m = server.mock(|when, then| {
            when.method(GET).path("/fee-estimates");
            then.status(200).json_body(json!({"1": 20.5, "6": 4.2, "144": 1.0}));
        });
        let client = EsploraClient::new(&server.base_url()).unwrap();
        assert_eq!(client.fee_rate().await.unwrap(), 5);
        m.delete();

        server.mock(|when, then| {
            when.method(GET).path("/fee-estimates");
            then.status(200).json_body(json!({"1": 20.5}));
        });
        assert_eq!(client.fee_rate().await.unwrap(), FALLBACK_FEE_RATE);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_keeps_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/tx");
            then.status(400).body("sendrawtransaction RPC error: {\"code\":-26,\"message\":\"dust\"}");
        });
        let client = EsploraClient::new(&server.base_url()).unwrap();
        let err = client.broadcast("0200").await.unwrap_err();
        match err {
            WalletError::BroadcastFailed { code, message } => {
                assert_eq!(code, "400");
                assert!(message.contains("dust"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tx_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tx/aa/status");
            then.status(200).json_body(json!({"confirmed": true, "block_height": 800000}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/tx/bb/status");
            then.status(200).json_body(json!({"confirmed": false}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/tx/cc/status");
            then.status(404).body("Transaction not found");
        });
        let client = EsploraClient::new(&server.base_url()).unwrap();
        assert_eq!(client.tx_status("aa").await.unwrap(), TransactionStatus::Confirmed);
        assert_eq!(client.tx_status("bb").await.unwrap(), TransactionStatus::Pending);
        assert_eq!(client.tx_status("cc").await.unwrap(), TransactionStatus::Unknown);
    }
}
