//! SQLite persistence for wallets, chain addresses, pending transactions
//! and encrypted secret blobs.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::core::config::StorageConfig;
use crate::core::domain::{AssetBalance, ChainAddress, KeyType, Wallet};
use crate::core::errors::WalletError;
use crate::service::pending_tx::{PendingTransaction, PendingTxStatus, PendingTxStore};

pub mod secure;

pub use secure::{
    EncryptedLocalStorage, InMemoryKeychain, KeyValueStore, KeychainStorage, MemoryKeyValueStore, NativeKeychain,
    SecureStorage, StorageBackend, StoreOptions,
};

type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Clone)]
pub struct WalletStore {
    pool: SqlitePool,
    is_memory: bool,
}

impl WalletStore {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::connect(
            &config.database_url,
            config.max_connections.unwrap_or(5),
            Duration::from_secs(config.connection_timeout_seconds.unwrap_or(30)),
        )
        .await
    }

    pub async fn new_with_url(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5, Duration::from_secs(30)).await
    }

    async fn connect(database_url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let db_url = normalize_sqlite_url(database_url);
        let is_memory = db_url.contains(":memory:");

        let safe_db_url_info = match db_url.split_once("://") {
            Some((scheme, rest)) => format!("{}://(redacted, len={})", scheme, rest.len()),
            None => "(invalid db_url format)".to_string(),
        };
        info!(db = %safe_db_url_info, "[storage] connecting to database");

        let mut connect_options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| WalletError::ConfigError(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !is_memory {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // every connection to ":memory:" opens its own database
        let pool_options = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options
            .acquire_timeout(acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to connect to database: {}", e)))?;

        let store = Self { pool, is_memory };
        store.initialize_schema().await?;
        info!("Wallet store initialized");
        Ok(store)
    }

    pub fn is_in_memory(&self) -> bool {
        self.is_memory
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                key_type TEXT NOT NULL,
                primary_chain TEXT NOT NULL,
                primary_address TEXT NOT NULL,
                secret_ref TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_addresses (
                wallet_id TEXT NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
                chain_id TEXT NOT NULL,
                address TEXT NOT NULL,
                assets TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (wallet_id, chain_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // no foreign key: history outlives the wallet
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_transactions (
                id TEXT PRIMARY KEY,
                wallet_id TEXT NOT NULL,
                chain_id TEXT NOT NULL,
                from_address TEXT NOT NULL,
                raw_signed_tx TEXT NOT NULL,
                status TEXT NOT NULL,
                tx_hash TEXT,
                error_code TEXT,
                error_message TEXT,
                meta TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pending_sender ON pending_transactions(chain_id, from_address)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secure_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ---- wallets ----

    /// Inserts the wallet and all of its chain addresses atomically.
    pub async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO wallets (id, name, key_type, primary_chain, primary_address, secret_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&wallet.id)
        .bind(&wallet.name)
        .bind(wallet.key_type.as_str())
        .bind(&wallet.primary_chain)
        .bind(&wallet.primary_address)
        .bind(&wallet.secret_ref)
        .bind(wallet.created_at)
        .execute(&mut *tx)
        .await?;

        for address in &wallet.chain_addresses {
            sqlx::query(
                "INSERT INTO chain_addresses (wallet_id, chain_id, address, assets) VALUES (?, ?, ?, ?)",
            )
            .bind(&wallet.id)
            .bind(&address.chain_id)
            .bind(&address.address)
            .bind(serde_json::to_string(&address.assets)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(wallet_id = %wallet.id, chains = wallet.chain_addresses.len(), "Stored wallet");
        Ok(())
    }

    pub async fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = ?")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut wallet = wallet_from_row(&row)?;
                wallet.chain_addresses = self.list_chain_addresses(wallet_id).await?;
                Ok(Some(wallet))
            }
            None => Ok(None),
        }
    }

    /// Oldest first.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query("SELECT * FROM wallets ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        let mut wallets = Vec::with_capacity(rows.len());
        for row in rows {
            let mut wallet = wallet_from_row(&row)?;
            wallet.chain_addresses = self.list_chain_addresses(&wallet.id).await?;
            wallets.push(wallet);
        }
        Ok(wallets)
    }

    pub async fn rename_wallet(&self, wallet_id: &str, name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET name = ? WHERE id = ?")
            .bind(name)
            .bind(wallet_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WalletError::NotFoundError(format!("wallet {}", wallet_id)));
        }
        Ok(())
    }

    /// Deletes the wallet and its chain addresses. Returns `false` when no
    /// such wallet exists.
    pub async fn delete_wallet(&self, wallet_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wallets WHERE id = ?")
            .bind(wallet_id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(wallet_id, "Deleted wallet");
        }
        Ok(deleted)
    }

    // ---- chain addresses ----

    pub async fn upsert_chain_address(&self, address: &ChainAddress) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_addresses (wallet_id, chain_id, address, assets) VALUES (?, ?, ?, ?)
            ON CONFLICT(wallet_id, chain_id) DO UPDATE SET assets = excluded.assets
            "#,
        )
        .bind(&address.wallet_id)
        .bind(&address.chain_id)
        .bind(&address.address)
        .bind(serde_json::to_string(&address.assets)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces the asset list of `walletId:chain`. The address itself never
    /// changes.
    pub async fn update_assets(&self, wallet_id: &str, chain_id: &str, assets: &[AssetBalance]) -> Result<()> {
        let result = sqlx::query("UPDATE chain_addresses SET assets = ? WHERE wallet_id = ? AND chain_id = ?")
            .bind(serde_json::to_string(assets)?)
            .bind(wallet_id)
            .bind(chain_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WalletError::NotFoundError(format!("chain address {}:{}", wallet_id, chain_id)));
        }
        Ok(())
    }

    pub async fn list_chain_addresses(&self, wallet_id: &str) -> Result<Vec<ChainAddress>> {
        let rows = sqlx::query("SELECT * FROM chain_addresses WHERE wallet_id = ? ORDER BY chain_id")
            .bind(wallet_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chain_address_from_row).collect()
    }
}

#[async_trait]
impl PendingTxStore for WalletStore {
    async fn insert_pending(&self, tx: &PendingTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_transactions
                (id, wallet_id, chain_id, from_address, raw_signed_tx, status, tx_hash,
                 error_code, error_message, meta, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.wallet_id)
        .bind(&tx.chain_id)
        .bind(&tx.from_address)
        .bind(&tx.raw_signed_tx)
        .bind(tx.status.as_str())
        .bind(&tx.tx_hash)
        .bind(&tx.error_code)
        .bind(&tx.error_message)
        .bind(serde_json::to_string(&tx.meta)?)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_pending(&self, tx: &PendingTransaction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_transactions
            SET raw_signed_tx = ?, status = ?, tx_hash = ?, error_code = ?, error_message = ?,
                meta = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&tx.raw_signed_tx)
        .bind(tx.status.as_str())
        .bind(&tx.tx_hash)
        .bind(&tx.error_code)
        .bind(&tx.error_message)
        .bind(serde_json::to_string(&tx.meta)?)
        .bind(tx.updated_at)
        .bind(&tx.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WalletError::NotFoundError(format!("pending tx {}", tx.id)));
        }
        Ok(())
    }

    async fn get_pending(&self, id: &str) -> Result<Option<PendingTransaction>> {
        let row = sqlx::query("SELECT * FROM pending_transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pending_from_row).transpose()
    }

    async fn list_pending_by_sender(&self, chain_id: &str, from_address: &str) -> Result<Vec<PendingTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM pending_transactions WHERE chain_id = ? AND from_address = ? ORDER BY created_at, id",
        )
        .bind(chain_id)
        .bind(from_address)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn list_pending_by_wallet(&self, wallet_id: &str) -> Result<Vec<PendingTransaction>> {
        let rows = sqlx::query("SELECT * FROM pending_transactions WHERE wallet_id = ? ORDER BY created_at, id")
            .bind(wallet_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn list_pending_by_status(&self, status: PendingTxStatus) -> Result<Vec<PendingTransaction>> {
        let rows = sqlx::query("SELECT * FROM pending_transactions WHERE status = ? ORDER BY created_at, id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pending_from_row).collect()
    }
}

#[async_trait]
impl KeyValueStore for WalletStore {
    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM secure_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO secure_kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secure_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Accepts `sqlite:` or `sqlite://` and creates the parent directory of
/// file-backed databases.
fn normalize_sqlite_url(database_url: &str) -> String {
    let mut db_url = database_url.to_string();
    if db_url.starts_with("sqlite:") && !db_url.starts_with("sqlite://") {
        db_url = db_url.replacen("sqlite:", "sqlite://", 1);
    }

    if let Some(path) = db_url.strip_prefix("sqlite://") {
        let (path_only, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };

        if path_only != ":memory:" && !path_only.is_empty() {
            if let Some(parent) = std::path::Path::new(&path_only).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        warn!("Failed to create database dir {:?}: {}", parent, e);
                    }
                }
            }
            db_url = match query {
                Some(q) => format!("sqlite://{}?{}", path_only, q),
                None => format!("sqlite://{}", path_only),
            };
        }
    }
    db_url
}

fn wallet_from_row(row: &SqliteRow) -> Result<Wallet> {
    let key_type: String = row.try_get("key_type")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(Wallet {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        key_type: KeyType::from_str(&key_type)?,
        primary_chain: row.try_get("primary_chain")?,
        primary_address: row.try_get("primary_address")?,
        secret_ref: row.try_get("secret_ref")?,
        chain_addresses: Vec::new(),
        created_at,
    })
}

fn chain_address_from_row(row: &SqliteRow) -> Result<ChainAddress> {
    let assets: String = row.try_get("assets")?;
    Ok(ChainAddress {
        wallet_id: row.try_get("wallet_id")?,
        chain_id: row.try_get("chain_id")?,
        address: row.try_get("address")?,
        assets: serde_json::from_str(&assets)?,
    })
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingTransaction> {
    let status: String = row.try_get("status")?;
    let meta: String = row.try_get("meta")?;
    Ok(PendingTransaction {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        chain_id: row.try_get("chain_id")?,
        from_address: row.try_get("from_address")?,
        raw_signed_tx: row.try_get("raw_signed_tx")?,
        status: PendingTxStatus::from_str(&status)?,
        tx_hash: row.try_get("tx_hash")?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        meta: serde_json::from_str(&meta)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Amount;
    use crate::service::pending_tx::{PendingTxLedger, PendingTxMeta};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn wallet(id: &str) -> Wallet {
        Wallet {
            id: id.to_string(),
            name: "Main".to_string(),
            key_type: KeyType::Mnemonic,
            primary_chain: "ethereum".to_string(),
            primary_address: "0x9858EfFD232B4033E47d90003D41EC34EcaEda94".to_string(),
            secret_ref: format!("wallet:{}:secret", id),
            chain_addresses: vec![
                ChainAddress {
                    wallet_id: id.to_string(),
                    chain_id: "ethereum".to_string(),
                    address: "0x9858EfFD232B4033E47d90003D41EC34EcaEda94".to_string(),
                    assets: Vec::new(),
                },
                ChainAddress {
                    wallet_id: id.to_string(),
                    chain_id: "tron".to_string(),
                    address: "TUEZSdKsoDHQMeZwihtdoBiN46zxhGWYdH".to_string(),
                    assets: Vec::new(),
                },
            ],
            created_at: Utc::now(),
        }
    }

    fn meta() -> PendingTxMeta {
        PendingTxMeta {
            to: "0x000000000000000000000000000000000000dEaD".into(),
            amount: "0.5".into(),
            symbol: "ETH".into(),
            fee: Some("0.002".into()),
            token_address: None,
        }
    }

    #[tokio::test]
    async fn test_wallet_crud() {
        let store = WalletStore::new_with_url("sqlite::memory:").await.unwrap();
        assert!(store.is_in_memory());

        let w = wallet("w1");
        store.insert_wallet(&w).await.unwrap();

        let loaded = store.get_wallet("w1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Main");
        assert_eq!(loaded.key_type, KeyType::Mnemonic);
        assert_eq!(loaded.chain_addresses.len(), 2);
        assert_eq!(loaded.address_on("tron").unwrap().key(), "w1:tron");

        store.rename_wallet("w1", "Savings").await.unwrap();
        assert_eq!(store.get_wallet("w1").await.unwrap().unwrap().name, "Savings");
        assert!(matches!(
            store.rename_wallet("nope", "x").await,
            Err(WalletError::NotFoundError(_))
        ));

        assert_eq!(store.list_wallets().await.unwrap().len(), 1);
        assert!(store.get_wallet("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_assets() {
        let store = WalletStore::new_with_url("sqlite::memory:").await.unwrap();
        store.insert_wallet(&wallet("w1")).await.unwrap();

        let assets = vec![AssetBalance {
            symbol: "ETH".into(),
            token_address: None,
            amount: Amount::parse("1.5", 18, "ETH").unwrap(),
        }];
        store.update_assets("w1", "ethereum", &assets).await.unwrap();

        let addresses = store.list_chain_addresses("w1").await.unwrap();
        let eth = addresses.iter().find(|a| a.chain_id == "ethereum").unwrap();
        assert_eq!(eth.assets, assets);
        assert!(store.update_assets("w1", "bitcoin", &assets).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades_addresses_but_keeps_history() {
        let store = WalletStore::new_with_url("sqlite::memory:").await.unwrap();
        store.insert_wallet(&wallet("w1")).await.unwrap();

        let ledger = PendingTxLedger::new(Arc::new(store.clone()));
        let pending = ledger
            .create("w1", "ethereum", "0x9858EfFD232B4033E47d90003D41EC34EcaEda94", "0xf86c", meta())
            .await
            .unwrap();

        assert!(store.delete_wallet("w1").await.unwrap());
        assert!(!store.delete_wallet("w1").await.unwrap());
        assert!(store.list_chain_addresses("w1").await.unwrap().is_empty());
        assert!(store.get_pending(&pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_persistence() {
        let store = WalletStore::new_with_url("sqlite::memory:").await.unwrap();
        let ledger = PendingTxLedger::new(Arc::new(store.clone()));
        let from = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

        let first = ledger.create("w1", "ethereum", from, "0x01", meta()).await.unwrap();
        ledger.mark_broadcasting(&first.id).await.unwrap();
        ledger.mark_failed(&first.id, "nonce_too_low", "nonce too low").await.unwrap();

        let second = ledger.create("w1", "ethereum", from, "0x02", meta()).await.unwrap();
        ledger.mark_broadcasting(&second.id).await.unwrap();
        ledger.mark_broadcasted(&second.id, "0xabc").await.unwrap();

        let records = store.list_pending_by_sender("ethereum", from).await.unwrap();
        assert_eq!(records.len(), 2);
        let failed = records.iter().find(|r| r.id == first.id).unwrap();
        assert_eq!(failed.status, PendingTxStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("nonce_too_low"));
        assert_eq!(failed.meta, meta());

        let broadcasted = store.list_pending_by_status(PendingTxStatus::Broadcasted).await.unwrap();
        assert_eq!(broadcasted.len(), 1);
        assert_eq!(broadcasted[0].tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(store.list_pending_by_wallet("w1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_secure_kv() {
        let store = WalletStore::new_with_url("sqlite::memory:").await.unwrap();
        assert_eq!(store.kv_get("k").await.unwrap(), None);
        store.kv_put("k", "v1").await.unwrap();
        store.kv_put("k", "v2").await.unwrap();
        assert_eq!(store.kv_get("k").await.unwrap().as_deref(), Some("v2"));
        assert!(store.kv_delete("k").await.unwrap());
        assert!(!store.kv_delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/nested/wallet.db?mode=rwc", dir.path().display());

        {
            let store = WalletStore::new_with_url(&url).await.unwrap();
            assert!(!store.is_in_memory());
            store.insert_wallet(&wallet("w1")).await.unwrap();
        }

        let reopened = WalletStore::new_with_url(&url).await.unwrap();
        let loaded = reopened.get_wallet("w1").await.unwrap().unwrap();
        assert_eq!(loaded.chain_addresses.len(), 2);
    }

    #[test]
    fn test_normalize_memory_url() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite://:memory:");
        assert_eq!(normalize_sqlite_url("sqlite://:memory:"), "sqlite://:memory:");
    }
}
