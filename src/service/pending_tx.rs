//! Pending transaction ledger.
//!
//! Every send is recorded here before it is broadcast, so a crash or a
//! rejected broadcast always leaves a record behind. Records are never
//! deleted; failed ones keep the adapter's error code and message.
//!
//! Lifecycle:
//! ```text
//! Created -> Broadcasting -> Broadcasted -> Confirmed
//!    |            |              |
//!    +------------+--------------+--> Failed -> Broadcasting (explicit resubmit)
//! ```
//!
//! A record left in `Broadcasting` by a crash is not stuck: a status refresh
//! resolves it through its known hash, and a resubmit may broadcast it again.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blockchain::registry::ChainAdapterRegistry;
use crate::blockchain::traits::TransactionStatus;
use crate::core::errors::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingTxStatus {
    Created,
    Broadcasting,
    Broadcasted,
    Confirmed,
    Failed,
}

impl PendingTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingTxStatus::Created => "created",
            PendingTxStatus::Broadcasting => "broadcasting",
            PendingTxStatus::Broadcasted => "broadcasted",
            PendingTxStatus::Confirmed => "confirmed",
            PendingTxStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: PendingTxStatus) -> bool {
        use PendingTxStatus::*;
        matches!(
            (self, next),
            (Created, Broadcasting)
                | (Created, Failed)
                | (Broadcasting, Broadcasting)
                | (Broadcasting, Broadcasted)
                | (Broadcasting, Confirmed)
                | (Broadcasting, Failed)
                | (Broadcasted, Confirmed)
                | (Broadcasted, Failed)
                | (Failed, Broadcasting)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PendingTxStatus::Confirmed)
    }
}

impl fmt::Display for PendingTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingTxStatus {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PendingTxStatus::Created),
            "broadcasting" => Ok(PendingTxStatus::Broadcasting),
            "broadcasted" => Ok(PendingTxStatus::Broadcasted),
            "confirmed" => Ok(PendingTxStatus::Confirmed),
            "failed" => Ok(PendingTxStatus::Failed),
            other => Err(WalletError::StorageError(format!("unknown pending status: {}", other))),
        }
    }
}

/// Display data kept next to the raw transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTxMeta {
    pub to: String,
    /// Decimal string in `symbol` units.
    pub amount: String,
    pub symbol: String,
    #[serde(default)]
    pub fee: Option<String>,
    #[serde(default)]
    pub token_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: String,
    pub wallet_id: String,
    pub chain_id: String,
    pub from_address: String,
    pub raw_signed_tx: String,
    pub status: PendingTxStatus,
    pub tx_hash: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub meta: PendingTxMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for pending transactions.
#[async_trait]
pub trait PendingTxStore: Send + Sync {
    async fn insert_pending(&self, tx: &PendingTransaction) -> Result<(), WalletError>;
    async fn update_pending(&self, tx: &PendingTransaction) -> Result<(), WalletError>;
    async fn get_pending(&self, id: &str) -> Result<Option<PendingTransaction>, WalletError>;
    /// Oldest first.
    async fn list_pending_by_sender(
        &self,
        chain_id: &str,
        from_address: &str,
    ) -> Result<Vec<PendingTransaction>, WalletError>;
    async fn list_pending_by_wallet(&self, wallet_id: &str) -> Result<Vec<PendingTransaction>, WalletError>;
    async fn list_pending_by_status(&self, status: PendingTxStatus) -> Result<Vec<PendingTransaction>, WalletError>;
}

/// Non-persistent store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryPendingTxStore {
    records: Mutex<HashMap<String, PendingTransaction>>,
}

impl MemoryPendingTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut records: Vec<PendingTransaction>) -> Vec<PendingTransaction> {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }
}

#[async_trait]
impl PendingTxStore for MemoryPendingTxStore {
    async fn insert_pending(&self, tx: &PendingTransaction) -> Result<(), WalletError> {
        let mut records = self.records.lock();
        if records.contains_key(&tx.id) {
            return Err(WalletError::StorageError(format!("duplicate pending tx {}", tx.id)));
        }
        records.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    async fn update_pending(&self, tx: &PendingTransaction) -> Result<(), WalletError> {
        match self.records.lock().get_mut(&tx.id) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(WalletError::NotFoundError(format!("pending tx {}", tx.id))),
        }
    }

    async fn get_pending(&self, id: &str) -> Result<Option<PendingTransaction>, WalletError> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn list_pending_by_sender(
        &self,
        chain_id: &str,
        from_address: &str,
    ) -> Result<Vec<PendingTransaction>, WalletError> {
        let records = self
            .records
            .lock()
            .values()
            .filter(|t| t.chain_id == chain_id && t.from_address == from_address)
            .cloned()
            .collect();
        Ok(Self::sorted(records))
    }

    async fn list_pending_by_wallet(&self, wallet_id: &str) -> Result<Vec<PendingTransaction>, WalletError> {
        let records = self
            .records
            .lock()
            .values()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect();
        Ok(Self::sorted(records))
    }

    async fn list_pending_by_status(&self, status: PendingTxStatus) -> Result<Vec<PendingTransaction>, WalletError> {
        let records = self
            .records
            .lock()
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(records))
    }
}

/// Ledger operations on top of a [`PendingTxStore`]. Enforces the status
/// transitions.
#[derive(Clone)]
pub struct PendingTxLedger {
    store: Arc<dyn PendingTxStore>,
}

impl PendingTxLedger {
    pub fn new(store: Arc<dyn PendingTxStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPendingTxStore::new()))
    }

    /// Records a signed transaction in `Created` state.
    pub async fn create(
        &self,
        wallet_id: &str,
        chain_id: &str,
        from_address: &str,
        raw_signed_tx: &str,
        meta: PendingTxMeta,
    ) -> Result<PendingTransaction, WalletError> {
        let now = Utc::now();
        let tx = PendingTransaction {
            id: Uuid::new_v4().to_string(),
            wallet_id: wallet_id.to_string(),
            chain_id: chain_id.to_string(),
            from_address: from_address.to_string(),
            raw_signed_tx: raw_signed_tx.to_string(),
            status: PendingTxStatus::Created,
            tx_hash: None,
            error_code: None,
            error_message: None,
            meta,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_pending(&tx).await?;
        debug!(id = %tx.id, chain = %chain_id, "Pending transaction created");
        Ok(tx)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingTransaction>, WalletError> {
        self.store.get_pending(id).await
    }

    async fn require(&self, id: &str) -> Result<PendingTransaction, WalletError> {
        self.store
            .get_pending(id)
            .await?
            .ok_or_else(|| WalletError::NotFoundError(format!("pending tx {}", id)))
    }

    async fn transition(
        &self,
        id: &str,
        next: PendingTxStatus,
        apply: impl FnOnce(&mut PendingTransaction),
    ) -> Result<PendingTransaction, WalletError> {
        let mut tx = self.require(id).await?;
        if !tx.status.can_transition_to(next) {
            return Err(WalletError::ValidationError(format!(
                "pending tx {} cannot go from {} to {}",
                id, tx.status, next
            )));
        }
        tx.status = next;
        apply(&mut tx);
        tx.updated_at = Utc::now();
        self.store.update_pending(&tx).await?;
        debug!(id = %id, status = %next, "Pending transaction updated");
        Ok(tx)
    }

    pub async fn mark_broadcasting(&self, id: &str) -> Result<PendingTransaction, WalletError> {
        self.mark_broadcasting_as(id, None).await
    }

    /// Like [`mark_broadcasting`](Self::mark_broadcasting), also keeping the
    /// hash the signed transaction will have so an interrupted broadcast can
    /// be looked up later.
    pub async fn mark_broadcasting_as(
        &self,
        id: &str,
        expected_hash: Option<&str>,
    ) -> Result<PendingTransaction, WalletError> {
        let hash = expected_hash.map(str::to_string);
        self.transition(id, PendingTxStatus::Broadcasting, move |tx| {
            tx.error_code = None;
            tx.error_message = None;
            if hash.is_some() {
                tx.tx_hash = hash;
            }
        })
        .await
    }

    pub async fn mark_broadcasted(&self, id: &str, tx_hash: &str) -> Result<PendingTransaction, WalletError> {
        let hash = tx_hash.to_string();
        self.transition(id, PendingTxStatus::Broadcasted, move |tx| tx.tx_hash = Some(hash))
            .await
    }

    pub async fn mark_confirmed(&self, id: &str) -> Result<PendingTransaction, WalletError> {
        self.transition(id, PendingTxStatus::Confirmed, |_| {}).await
    }

    /// An empty message is replaced so failed records always explain
    /// themselves.
    pub async fn mark_failed(&self, id: &str, code: &str, message: &str) -> Result<PendingTransaction, WalletError> {
        let code = code.to_string();
        let message = if message.trim().is_empty() {
            "transaction failed".to_string()
        } else {
            message.to_string()
        };
        self.transition(id, PendingTxStatus::Failed, move |tx| {
            tx.error_code = Some(code);
            tx.error_message = Some(message);
        })
        .await
    }

    pub async fn list_for(&self, chain_id: &str, from_address: &str) -> Result<Vec<PendingTransaction>, WalletError> {
        self.store.list_pending_by_sender(chain_id, from_address).await
    }

    pub async fn list_for_wallet(&self, wallet_id: &str) -> Result<Vec<PendingTransaction>, WalletError> {
        self.store.list_pending_by_wallet(wallet_id).await
    }

    /// Asks each chain about `Broadcasted` records, and `Broadcasting`
    /// records with a known hash, and moves them on to `Broadcasted`,
    /// `Confirmed` or `Failed`. Returns the records that changed. Chains
    /// without an adapter, and lookups that fail, are left for the next
    /// refresh.
    pub async fn refresh_status(
        &self,
        registry: &ChainAdapterRegistry,
    ) -> Result<Vec<PendingTransaction>, WalletError> {
        let mut records = self.store.list_pending_by_status(PendingTxStatus::Broadcasting).await?;
        records.extend(self.store.list_pending_by_status(PendingTxStatus::Broadcasted).await?);

        let mut changed = Vec::new();
        for record in records {
            let (Some(adapter), Some(hash)) = (registry.get_adapter(&record.chain_id), record.tx_hash.as_deref())
            else {
                continue;
            };
            match adapter.transaction().get_transaction_status(hash).await {
                Ok(TransactionStatus::Pending) if record.status == PendingTxStatus::Broadcasting => {
                    info!(id = %record.id, tx_hash = %hash, "Interrupted broadcast reached the network");
                    changed.push(self.mark_broadcasted(&record.id, hash).await?);
                }
                Ok(TransactionStatus::Confirmed) => {
                    info!(id = %record.id, tx_hash = %hash, "Transaction confirmed");
                    changed.push(self.mark_confirmed(&record.id).await?);
                }
                Ok(TransactionStatus::Failed) => {
                    warn!(id = %record.id, tx_hash = %hash, "Transaction failed on chain");
                    changed.push(
                        self.mark_failed(&record.id, "CHAIN_FAILED", "transaction failed on chain")
                            .await?,
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(id = %record.id, "Status lookup failed: {}", e),
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockAdapter;
    use crate::core::config::WalletConfig;
    use test_case::test_case;

    fn meta() -> PendingTxMeta {
        PendingTxMeta {
            to: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into(),
            amount: "0.5".into(),
            symbol: "ETH".into(),
            fee: Some("0.00042".into()),
            token_address: None,
        }
    }

    #[test_case(PendingTxStatus::Created, PendingTxStatus::Broadcasting, true)]
    #[test_case(PendingTxStatus::Created, PendingTxStatus::Broadcasted, false)]
    #[test_case(PendingTxStatus::Broadcasting, PendingTxStatus::Broadcasted, true)]
    #[test_case(PendingTxStatus::Broadcasting, PendingTxStatus::Failed, true)]
    #[test_case(PendingTxStatus::Broadcasting, PendingTxStatus::Broadcasting, true)]
    #[test_case(PendingTxStatus::Broadcasted, PendingTxStatus::Broadcasting, false)]
    #[test_case(PendingTxStatus::Broadcasted, PendingTxStatus::Confirmed, true)]
    #[test_case(PendingTxStatus::Failed, PendingTxStatus::Broadcasting, true)]
    #[test_case(PendingTxStatus::Failed, PendingTxStatus::Confirmed, false)]
    #[test_case(PendingTxStatus::Confirmed, PendingTxStatus::Failed, false)]
    fn test_transitions(from: PendingTxStatus, to: PendingTxStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            PendingTxStatus::Created,
            PendingTxStatus::Broadcasting,
            PendingTxStatus::Broadcasted,
            PendingTxStatus::Confirmed,
            PendingTxStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<PendingTxStatus>().unwrap(), s);
        }
        assert!("lost".parse::<PendingTxStatus>().is_err());
    }

    #[tokio::test]
    async fn test_success_path() {
        let ledger = PendingTxLedger::in_memory();
        let tx = ledger.create("w1", "ethereum", "0xabc", "0xf86c", meta()).await.unwrap();
        assert_eq!(tx.status, PendingTxStatus::Created);

        ledger.mark_broadcasting(&tx.id).await.unwrap();
        let done = ledger.mark_broadcasted(&tx.id, "0xhash").await.unwrap();
        assert_eq!(done.status, PendingTxStatus::Broadcasted);
        assert_eq!(done.tx_hash.as_deref(), Some("0xhash"));

        let listed = ledger.list_for("ethereum", "0xabc").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(ledger.list_for("binance", "0xabc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_record_and_message() {
        let ledger = PendingTxLedger::in_memory();
        let tx = ledger.create("w1", "tron", "Tabc", "{}", meta()).await.unwrap();
        ledger.mark_broadcasting(&tx.id).await.unwrap();
        let failed = ledger.mark_failed(&tx.id, "SIGERROR", "").await.unwrap();
        assert_eq!(failed.error_code.as_deref(), Some("SIGERROR"));
        assert!(!failed.error_message.unwrap().is_empty());
        assert!(ledger.get(&tx.id).await.unwrap().is_some());
        assert_eq!(ledger.list_for_wallet("w1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let ledger = PendingTxLedger::in_memory();
        let tx = ledger.create("w1", "ethereum", "0xabc", "0x", meta()).await.unwrap();
        let err = ledger.mark_broadcasted(&tx.id, "0xhash").await.unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(_)));
        assert!(matches!(
            ledger.mark_broadcasting("missing").await,
            Err(WalletError::NotFoundError(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_promotes_broadcasted() {
        let registry = ChainAdapterRegistry::new();
        let config = WalletConfig::default().chains[0].clone();
        let adapter = Arc::new(MockAdapter::new(config.clone()));
        adapter.set_status("0xok", TransactionStatus::Confirmed);
        adapter.set_status("0xbad", TransactionStatus::Failed);
        registry.register(adapter);

        let ledger = PendingTxLedger::in_memory();
        let mut ids = Vec::new();
        for hash in ["0xok", "0xbad", "0xwaiting"] {
            let tx = ledger.create("w1", &config.id, "0xabc", "0x", meta()).await.unwrap();
            ledger.mark_broadcasting(&tx.id).await.unwrap();
            ledger.mark_broadcasted(&tx.id, hash).await.unwrap();
            ids.push(tx.id);
        }

        let changed = ledger.refresh_status(&registry).await.unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(ledger.get(&ids[0]).await.unwrap().unwrap().status, PendingTxStatus::Confirmed);
        assert_eq!(ledger.get(&ids[1]).await.unwrap().unwrap().status, PendingTxStatus::Failed);
        assert_eq!(ledger.get(&ids[2]).await.unwrap().unwrap().status, PendingTxStatus::Broadcasted);
    }

    #[tokio::test]
    async fn test_refresh_resolves_interrupted_broadcasts() {
        let registry = ChainAdapterRegistry::new();
        let config = WalletConfig::default().chains[0].clone();
        let adapter = Arc::new(MockAdapter::new(config.clone()));
        adapter.set_status("0xseen", TransactionStatus::Pending);
        adapter.set_status("0xmined", TransactionStatus::Confirmed);
        registry.register(adapter);

        let ledger = PendingTxLedger::in_memory();
        let mut ids = Vec::new();
        for hash in [Some("0xseen"), Some("0xmined"), None] {
            let tx = ledger.create("w1", &config.id, "0xabc", "0x", meta()).await.unwrap();
            let marked = ledger.mark_broadcasting_as(&tx.id, hash).await.unwrap();
            assert_eq!(marked.tx_hash.as_deref(), hash);
            ids.push(tx.id);
        }

        let changed = ledger.refresh_status(&registry).await.unwrap();
        assert_eq!(changed.len(), 2);
        let seen = ledger.get(&ids[0]).await.unwrap().unwrap();
        assert_eq!(seen.status, PendingTxStatus::Broadcasted);
        assert_eq!(seen.tx_hash.as_deref(), Some("0xseen"));
        assert_eq!(ledger.get(&ids[1]).await.unwrap().unwrap().status, PendingTxStatus::Confirmed);
        // no hash to look up, left for an explicit resubmit
        assert_eq!(ledger.get(&ids[2]).await.unwrap().unwrap().status, PendingTxStatus::Broadcasting);
        ledger.mark_broadcasting(&ids[2]).await.unwrap();
    }
}
