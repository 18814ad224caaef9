// In-memory chain adapter for tests and offline runs. No network access;
// balances, fees and failures are scripted by the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::traits::{
    AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial, SignedTransaction,
    TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
use crate::core::amount::Amount;
use crate::core::bioforest::BioforestKeypair;
use crate::core::domain::ChainConfig;
use crate::core::errors::{TxBuildReason, WalletError};
use crate::core::validation::is_valid_address;

#[derive(Default)]
struct MockState {
    balances: HashMap<String, u128>,
    token_balances: HashMap<(String, String), u128>,
    fee: u128,
    scripted_fees: VecDeque<(u128, Duration)>,
    build_failure: Option<TxBuildReason>,
    broadcast_failure: Option<(String, String)>,
    second_public_key: Option<String>,
    statuses: HashMap<String, TransactionStatus>,
    broadcasts: Vec<SignedTransaction>,
    next_hash: u64,
    send_delay: Duration,
}

pub struct MockAdapter {
    config: ChainConfig,
    state: Mutex<MockState>,
    active_sends: AtomicUsize,
    overlapped: AtomicBool,
}

/// Marks a build or broadcast as running until dropped.
struct SendWindow<'a>(&'a AtomicUsize);

impl Drop for SendWindow<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockAdapter {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MockState::default()),
            active_sends: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
        }
    }

    /// Makes every build and broadcast take `delay`, widening the window in
    /// which two sends could overlap.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = delay;
    }

    /// True once a build or broadcast started while another was running.
    pub fn saw_overlapping_sends(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    async fn enter_send(&self) -> SendWindow<'_> {
        if self.active_sends.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let window = SendWindow(&self.active_sends);
        let delay = self.state.lock().send_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        window
    }

    pub fn set_balance(&self, address: &str, raw: u128) {
        self.state.lock().balances.insert(address.to_string(), raw);
    }

    pub fn set_token_balance(&self, address: &str, token: &str, raw: u128) {
        self.state
            .lock()
            .token_balances
            .insert((address.to_string(), token.to_string()), raw);
    }

    /// Fee returned when no scripted fee is queued.
    pub fn set_fee(&self, raw: u128) {
        self.state.lock().fee = raw;
    }

    /// Queues a fee answer delivered after `delay`.
    pub fn push_fee(&self, raw: u128, delay: Duration) {
        self.state.lock().scripted_fees.push_back((raw, delay));
    }

    pub fn fail_build(&self, reason: Option<TxBuildReason>) {
        self.state.lock().build_failure = reason;
    }

    pub fn fail_broadcast(&self, failure: Option<(&str, &str)>) {
        self.state.lock().broadcast_failure = failure.map(|(c, m)| (c.to_string(), m.to_string()));
    }

    pub fn set_second_public_key(&self, public_key: Option<String>) {
        self.state.lock().second_public_key = public_key;
    }

    pub fn set_status(&self, tx_hash: &str, status: TransactionStatus) {
        self.state.lock().statuses.insert(tx_hash.to_string(), status);
    }

    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.state.lock().broadcasts.clone()
    }

    fn native(&self, raw: u128) -> Amount {
        Amount::from_raw(raw, self.config.decimals, &self.config.symbol)
    }
}

impl IdentityService for MockAdapter {
    fn is_valid_address(&self, address: &str) -> bool {
        is_valid_address(address, self.config.kind, self.config.prefix.as_deref())
    }
}

#[async_trait]
impl AssetService for MockAdapter {
    async fn get_native_balance(&self, address: &str) -> Result<Amount, WalletError> {
        let raw = self.state.lock().balances.get(address).copied().unwrap_or(0);
        Ok(self.native(raw))
    }

    async fn get_token_balance(
        &self,
        address: &str,
        token_address: &str,
        decimals: u8,
        symbol: &str,
    ) -> Result<Amount, WalletError> {
        let raw = self
            .state
            .lock()
            .token_balances
            .get(&(address.to_string(), token_address.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(Amount::from_raw(raw, decimals, symbol))
    }
}

#[async_trait]
impl TransactionService for MockAdapter {
    async fn estimate_fee(&self, _intent: &TransferIntent) -> Result<FeeEstimate, WalletError> {
        let (raw, delay) = {
            let mut state = self.state.lock();
            let fallback = state.fee;
            state.scripted_fees.pop_front().unwrap_or((fallback, Duration::ZERO))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(FeeEstimate { standard: self.native(raw) })
    }

    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, WalletError> {
        let _window = self.enter_send().await;
        if let Some(reason) = self.state.lock().build_failure.clone() {
            return Err(WalletError::build_failed(reason, "scripted build failure"));
        }
        let second_public_key = self.state.lock().second_public_key.clone();
        Ok(UnsignedTransaction {
            chain_id: self.config.id.clone(),
            intent: intent.clone(),
            payload: json!({ "second_public_key": second_public_key }),
        })
    }

    async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
        key: &KeyMaterial<'_>,
    ) -> Result<SignedTransaction, WalletError> {
        if key.secret.is_empty() {
            return Err(WalletError::SigningFailed("empty secret".into()));
        }
        if let Some(registered) = unsigned.payload.get("second_public_key").and_then(|v| v.as_str()) {
            let pay = key
                .pay_password
                .ok_or_else(|| WalletError::AuthenticationFailed("pay password required".into()))?;
            if BioforestKeypair::from_secret(pay.expose()).public_key_hex() != registered {
                return Err(WalletError::AuthenticationFailed("pay password does not match".into()));
            }
        }
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: serde_json::to_string(&unsigned.intent)?,
            tx_hash: None,
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String, WalletError> {
        let _window = self.enter_send().await;
        let mut state = self.state.lock();
        state.broadcasts.push(signed.clone());
        if let Some((code, message)) = state.broadcast_failure.clone() {
            return Err(WalletError::broadcast_failed(code, message));
        }
        state.next_hash += 1;
        Ok(format!("0xmock{:04}", state.next_hash))
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus, WalletError> {
        Ok(self
            .state
            .lock()
            .statuses
            .get(tx_hash)
            .cloned()
            .unwrap_or(TransactionStatus::Unknown))
    }

    async fn second_public_key(&self, _address: &str) -> Result<Option<String>, WalletError> {
        Ok(self.state.lock().second_public_key.clone())
    }
}

impl ChainAdapter for MockAdapter {
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
