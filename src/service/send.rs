//! Send flow.
//!
//! ```text
//! Input -> Confirm -> Sending -> Result(Success | Failed)
//!             ^          |
//!             +----------+-- PasswordRequired / TwoStepSecretRequired
//! ```
//!
//! Validation happens on `Input -> Confirm`. `submit` never returns an
//! error: every failure ends in `Result(Failed)` with a readable message.
//! Sends for the same (wallet, chain) are serialized.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blockchain::registry::ChainAdapterRegistry;
use crate::blockchain::traits::{ChainAdapter, FeeEstimate, KeyMaterial, SignedTransaction, TransferIntent};
use crate::core::amount::Amount;
use crate::core::errors::WalletError;
use crate::security::secret::WalletSecret;
use crate::service::pending_tx::{PendingTransaction, PendingTxLedger, PendingTxMeta, PendingTxStatus};
use crate::storage::{SecureStorage, StoreOptions, WalletStore};

/// Token being moved instead of the chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAsset {
    /// Contract address, or asset type on BioForest chains.
    pub address: String,
    pub decimals: u8,
    pub symbol: String,
}

/// What the user typed on the input screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub wallet_id: String,
    pub chain_id: String,
    pub to: String,
    /// Decimal string, e.g. `"0.5"`.
    pub amount: String,
    #[serde(default)]
    pub token: Option<TokenAsset>,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Validated transfer shown on the confirm screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDraft {
    pub wallet_id: String,
    pub chain_id: String,
    pub intent: TransferIntent,
    pub fee: FeeEstimate,
    /// The amount was lowered to leave room for the fee.
    pub adjusted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Success { tx_hash: String, pending_id: String },
    Failed { code: String, message: String, pending_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SendState {
    Input,
    Confirm { draft: SendDraft },
    Sending,
    PasswordRequired,
    TwoStepSecretRequired { public_key: String },
    Result { outcome: SendOutcome },
}

impl SendState {
    fn failed(code: &str, message: impl Into<String>, pending_id: Option<String>) -> Self {
        SendState::Result {
            outcome: SendOutcome::Failed { code: code.to_string(), message: message.into(), pending_id },
        }
    }

    fn from_error(error: &WalletError, pending_id: Option<String>) -> Self {
        Self::failed(failure_code(error), error.to_string(), pending_id)
    }
}

/// Build failures and broadcast rejections carry the chain's own code.
fn failure_code(error: &WalletError) -> &str {
    match error {
        WalletError::TxBuildFailed { reason, .. } => reason.code(),
        WalletError::BroadcastFailed { code, .. } => code.as_str(),
        other => other.code(),
    }
}

/// Result of checking an amount against the sender's balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountCheck {
    pub amount: Amount,
    pub adjusted: bool,
}

/// Checks `amount` against `balance` given `fee`.
///
/// When the fee is paid in the transferred asset, `amount + fee` must fit;
/// sending exactly the whole balance sends `balance - fee` instead. When
/// the fee is paid in another asset, the amount is checked against
/// `balance` and the fee against `fee_balance`.
pub fn check_amount(
    amount: &Amount,
    balance: &Amount,
    fee: &Amount,
    fee_balance: Option<&Amount>,
) -> Result<AmountCheck, WalletError> {
    if amount.is_zero() {
        return Err(WalletError::InvalidAmount("amount must be greater than zero".into()));
    }

    match fee_balance {
        None => {
            if amount.compare(balance)? == Ordering::Equal && !fee.is_zero() {
                let remaining = balance.checked_sub(fee).map_err(|_| {
                    WalletError::InsufficientFee(format!(
                        "fee {} exceeds balance {}",
                        fee.to_decimal_string(),
                        balance.to_decimal_string()
                    ))
                })?;
                if remaining.is_zero() {
                    return Err(WalletError::InsufficientFee(format!(
                        "fee {} consumes the whole balance",
                        fee.to_decimal_string()
                    )));
                }
                return Ok(AmountCheck { amount: remaining, adjusted: true });
            }
            let total = amount.checked_add(fee)?;
            if total.compare(balance)? == Ordering::Greater {
                return Err(WalletError::InsufficientFunds(format!(
                    "{} + fee {} exceeds balance {} {}",
                    amount.to_decimal_string(),
                    fee.to_decimal_string(),
                    balance.to_decimal_string(),
                    balance.symbol()
                )));
            }
            Ok(AmountCheck { amount: amount.clone(), adjusted: false })
        }
        Some(fee_balance) => {
            if amount.compare(balance)? == Ordering::Greater {
                return Err(WalletError::InsufficientFunds(format!(
                    "{} exceeds balance {} {}",
                    amount.to_decimal_string(),
                    balance.to_decimal_string(),
                    balance.symbol()
                )));
            }
            if fee.compare(fee_balance)? == Ordering::Greater {
                return Err(WalletError::InsufficientFee(format!(
                    "fee {} exceeds balance {} {}",
                    fee.to_decimal_string(),
                    fee_balance.to_decimal_string(),
                    fee_balance.symbol()
                )));
            }
            Ok(AmountCheck { amount: amount.clone(), adjusted: false })
        }
    }
}

type SendLock = Arc<tokio::sync::Mutex<()>>;
type LockKey = (String, String);

pub struct SendOrchestrator {
    registry: Arc<ChainAdapterRegistry>,
    wallets: WalletStore,
    secrets: Arc<dyn SecureStorage>,
    ledger: PendingTxLedger,
    locks: Mutex<HashMap<LockKey, SendLock>>,
}

impl SendOrchestrator {
    pub fn new(
        registry: Arc<ChainAdapterRegistry>,
        wallets: WalletStore,
        secrets: Arc<dyn SecureStorage>,
        ledger: PendingTxLedger,
    ) -> Self {
        Self { registry, wallets, secrets, ledger, locks: Mutex::new(HashMap::new()) }
    }

    pub fn ledger(&self) -> &PendingTxLedger {
        &self.ledger
    }

    fn adapter(&self, chain_id: &str) -> Result<Arc<dyn ChainAdapter>, WalletError> {
        self.registry
            .get_adapter(chain_id)
            .ok_or_else(|| WalletError::UnsupportedChain(chain_id.to_string()))
    }

    fn lock_for(&self, key: &LockKey) -> SendLock {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drops the map entry once no other send holds or waits on it.
    fn release_lock(&self, key: &LockKey, lock: SendLock) {
        drop(lock);
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Number of (wallet, chain) pairs with a send running or queued.
    pub fn active_send_locks(&self) -> usize {
        self.locks.lock().len()
    }

    async fn sender_address(&self, wallet_id: &str, chain_id: &str) -> Result<(String, String), WalletError> {
        let wallet = self
            .wallets
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| WalletError::NotFoundError(format!("wallet {}", wallet_id)))?;
        let address = wallet
            .address_on(chain_id)
            .ok_or_else(|| WalletError::UnsupportedChain(format!("wallet {} has no {} address", wallet_id, chain_id)))?
            .address
            .clone();
        Ok((address, wallet.secret_ref))
    }

    /// Builds the transfer intent for `request` without touching balances.
    pub async fn intent_for(&self, request: &SendRequest) -> Result<TransferIntent, WalletError> {
        let adapter = self.adapter(&request.chain_id)?;
        let config = adapter.config();

        if !adapter.identity().is_valid_address(&request.to) {
            return Err(WalletError::InvalidAddress(format!(
                "{} is not a valid {} address",
                request.to, config.symbol
            )));
        }

        let amount = match &request.token {
            Some(token) => Amount::parse(&request.amount, token.decimals, &token.symbol)?,
            None => Amount::parse(&request.amount, config.decimals, &config.symbol)?,
        };
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount("amount must be greater than zero".into()));
        }

        let (from, _) = self.sender_address(&request.wallet_id, &request.chain_id).await?;
        Ok(TransferIntent {
            from,
            to: request.to.clone(),
            amount,
            token_address: request.token.as_ref().map(|t| t.address.clone()),
            memo: request.memo.clone(),
        })
    }

    /// Input -> Confirm. Validates the recipient and checks the amount
    /// against the current balance and fee.
    pub async fn prepare(&self, request: &SendRequest) -> Result<SendDraft, WalletError> {
        let adapter = self.adapter(&request.chain_id)?;
        let intent = self.intent_for(request).await?;
        let fee = adapter.transaction().estimate_fee(&intent).await?;
        let native = adapter.asset().get_native_balance(&intent.from).await?;

        let check = match &request.token {
            None => check_amount(&intent.amount, &native, &fee.standard, None)?,
            Some(token) => {
                let token_balance = adapter
                    .asset()
                    .get_token_balance(&intent.from, &token.address, token.decimals, &token.symbol)
                    .await?;
                check_amount(&intent.amount, &token_balance, &fee.standard, Some(&native))?
            }
        };
        if check.adjusted {
            info!(
                chain = %request.chain_id,
                amount = %check.amount.to_decimal_string(),
                "Amount lowered to leave room for the fee"
            );
        }

        Ok(SendDraft {
            wallet_id: request.wallet_id.clone(),
            chain_id: request.chain_id.clone(),
            intent: TransferIntent { amount: check.amount, ..intent },
            fee,
            adjusted: check.adjusted,
        })
    }

    /// Confirm -> Sending -> Result, or back to Confirm through one of the
    /// side exits.
    pub async fn submit(
        &self,
        draft: &SendDraft,
        password: Option<&WalletSecret>,
        pay_password: Option<&WalletSecret>,
    ) -> SendState {
        let key = (draft.wallet_id.clone(), draft.chain_id.clone());
        let lock = self.lock_for(&key);
        let state = {
            let _guard = lock.lock().await;
            self.submit_locked(draft, password, pay_password).await
        };
        self.release_lock(&key, lock);
        state
    }

    async fn submit_locked(
        &self,
        draft: &SendDraft,
        password: Option<&WalletSecret>,
        pay_password: Option<&WalletSecret>,
    ) -> SendState {
        debug!(wallet_id = %draft.wallet_id, chain = %draft.chain_id, "Sending");

        let adapter = match self.adapter(&draft.chain_id) {
            Ok(adapter) => adapter,
            Err(e) => return SendState::from_error(&e, None),
        };
        let secret_ref = match self.sender_address(&draft.wallet_id, &draft.chain_id).await {
            Ok((_, secret_ref)) => secret_ref,
            Err(e) => return SendState::from_error(&e, None),
        };
        let from = draft.intent.from.clone();

        let second_public_key = match adapter.transaction().second_public_key(&from).await {
            Ok(key) => key,
            Err(e) => return SendState::from_error(&e, None),
        };
        if let (Some(public_key), None) = (&second_public_key, pay_password) {
            return SendState::TwoStepSecretRequired { public_key: public_key.clone() };
        }

        let unsigned = match adapter.transaction().build_transaction(&draft.intent).await {
            Ok(unsigned) => unsigned,
            Err(e) => {
                warn!(chain = %draft.chain_id, "Build failed: {}", e);
                return SendState::from_error(&e, None);
            }
        };

        // The decrypted secret lives only for this block: unlock, sign, drop.
        let signed = {
            let secret = match self.unlock(&secret_ref, password).await {
                Ok(secret) => secret,
                Err(state) => return state,
            };
            let key = KeyMaterial::new(&secret).with_pay_password(pay_password);
            match adapter.transaction().sign_transaction(&unsigned, &key).await {
                Ok(signed) => signed,
                Err(WalletError::AuthenticationFailed(_)) if second_public_key.is_some() => {
                    return SendState::TwoStepSecretRequired {
                        public_key: second_public_key.unwrap_or_default(),
                    };
                }
                Err(e) => return SendState::from_error(&e, None),
            }
        };

        let meta = PendingTxMeta {
            to: draft.intent.to.clone(),
            amount: draft.intent.amount.to_decimal_string(),
            symbol: draft.intent.amount.symbol().to_string(),
            fee: Some(draft.fee.standard.to_decimal_string()),
            token_address: draft.intent.token_address.clone(),
        };
        let pending = match self
            .ledger
            .create(&draft.wallet_id, &draft.chain_id, &from, &signed.raw, meta)
            .await
        {
            Ok(pending) => pending,
            Err(e) => return SendState::from_error(&e, None),
        };

        self.broadcast(adapter.as_ref(), &pending, &signed).await
    }

    /// Re-broadcasts a record's stored transaction. `Failed` and `Created`
    /// records qualify, and so does a `Broadcasting` record that no running
    /// send owns, i.e. one left behind by a crash or a dropped future.
    pub async fn resubmit(&self, pending_id: &str) -> SendState {
        let pending = match self.ledger.get(pending_id).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                return SendState::failed("NOT_FOUND", format!("pending tx {} not found", pending_id), None)
            }
            Err(e) => return SendState::from_error(&e, None),
        };

        let key = (pending.wallet_id.clone(), pending.chain_id.clone());
        let lock = self.lock_for(&key);
        let state = {
            let _guard = lock.lock().await;
            self.resubmit_locked(pending_id).await
        };
        self.release_lock(&key, lock);
        state
    }

    async fn resubmit_locked(&self, pending_id: &str) -> SendState {
        // re-read: a send that held the lock may have moved the record on
        let pending = match self.ledger.get(pending_id).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                return SendState::failed("NOT_FOUND", format!("pending tx {} not found", pending_id), None)
            }
            Err(e) => return SendState::from_error(&e, None),
        };
        if !matches!(
            pending.status,
            PendingTxStatus::Failed | PendingTxStatus::Created | PendingTxStatus::Broadcasting
        ) {
            return SendState::failed(
                "VALIDATION_ERROR",
                format!("pending tx {} is {}, nothing to resubmit", pending_id, pending.status),
                Some(pending.id),
            );
        }

        let adapter = match self.adapter(&pending.chain_id) {
            Ok(adapter) => adapter,
            Err(e) => return SendState::from_error(&e, Some(pending.id)),
        };
        let signed = SignedTransaction {
            chain_id: pending.chain_id.clone(),
            raw: pending.raw_signed_tx.clone(),
            tx_hash: pending.tx_hash.clone(),
        };
        info!(id = %pending.id, chain = %pending.chain_id, status = %pending.status, "Resubmitting transaction");
        self.broadcast(adapter.as_ref(), &pending, &signed).await
    }

    async fn broadcast(
        &self,
        adapter: &dyn ChainAdapter,
        pending: &PendingTransaction,
        signed: &SignedTransaction,
    ) -> SendState {
        let id = pending.id.clone();
        if let Err(e) = self.ledger.mark_broadcasting_as(&id, signed.tx_hash.as_deref()).await {
            return SendState::from_error(&e, Some(id));
        }

        match adapter.transaction().broadcast_transaction(signed).await {
            Ok(tx_hash) => {
                if let Err(e) = self.ledger.mark_broadcasted(&id, &tx_hash).await {
                    warn!(id = %id, "Broadcast succeeded but ledger update failed: {}", e);
                }
                info!(id = %id, tx_hash = %tx_hash, chain = %pending.chain_id, "Transaction broadcast");
                SendState::Result { outcome: SendOutcome::Success { tx_hash, pending_id: id } }
            }
            Err(e) => {
                warn!(id = %id, chain = %pending.chain_id, "Broadcast failed: {}", e);
                let message = match &e {
                    WalletError::BroadcastFailed { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                if let Err(ledger_err) = self.ledger.mark_failed(&id, failure_code(&e), &message).await {
                    warn!(id = %id, "Ledger update failed: {}", ledger_err);
                }
                SendState::from_error(&e, Some(id))
            }
        }
    }

    /// Wrong or missing password comes back as `PasswordRequired`.
    async fn unlock(&self, secret_ref: &str, password: Option<&WalletSecret>) -> Result<WalletSecret, SendState> {
        let opts = StoreOptions { password, use_biometric: false };
        match self.secrets.retrieve(secret_ref, &opts).await {
            Ok(Some(secret)) => Ok(secret),
            Ok(None) => Err(SendState::failed("NOT_FOUND", "wallet secret is missing", None)),
            Err(WalletError::DecryptionFailed) | Err(WalletError::AuthenticationFailed(_)) => {
                Err(SendState::PasswordRequired)
            }
            Err(e) => Err(SendState::from_error(&e, None)),
        }
    }
}

/// One send screen. Holds the current state and enforces the transitions.
pub struct SendSession {
    orchestrator: Arc<SendOrchestrator>,
    state: SendState,
    draft: Option<SendDraft>,
    fee_generation: AtomicU64,
    latest_fee: Mutex<Option<FeeEstimate>>,
}

impl SendSession {
    pub fn new(orchestrator: Arc<SendOrchestrator>) -> Self {
        Self {
            orchestrator,
            state: SendState::Input,
            draft: None,
            fee_generation: AtomicU64::new(0),
            latest_fee: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &SendState {
        &self.state
    }

    pub fn draft(&self) -> Option<&SendDraft> {
        self.draft.as_ref()
    }

    /// Latest fee quote that was not superseded.
    pub fn latest_fee(&self) -> Option<FeeEstimate> {
        self.latest_fee.lock().clone()
    }

    /// Requests a fee quote. Only the most recent request wins: a quote
    /// that finishes after a newer request was issued is dropped and
    /// `Ok(None)` is returned.
    pub async fn refresh_fee(&self, request: &SendRequest) -> Result<Option<FeeEstimate>, WalletError> {
        let ticket = self.fee_generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let adapter = self.orchestrator.adapter(&request.chain_id)?;
        let intent = self.orchestrator.intent_for(request).await?;
        let fee = adapter.transaction().estimate_fee(&intent).await?;

        if self.fee_generation.load(AtomicOrdering::SeqCst) != ticket {
            debug!(ticket, "Discarding stale fee estimate");
            return Ok(None);
        }
        *self.latest_fee.lock() = Some(fee.clone());
        Ok(Some(fee))
    }

    /// Input -> Confirm. On validation errors the session stays in `Input`.
    pub async fn confirm(&mut self, request: &SendRequest) -> Result<&SendState, WalletError> {
        if !matches!(self.state, SendState::Input | SendState::Confirm { .. }) {
            return Err(WalletError::ValidationError("send is not accepting input".into()));
        }
        let draft = self.orchestrator.prepare(request).await?;
        *self.latest_fee.lock() = Some(draft.fee.clone());
        self.draft = Some(draft.clone());
        self.state = SendState::Confirm { draft };
        Ok(&self.state)
    }

    /// Confirm -> Sending -> Result. Side exits return to Confirm with the
    /// draft kept, so the caller can retry with the missing secret.
    pub async fn submit(
        &mut self,
        password: Option<&WalletSecret>,
        pay_password: Option<&WalletSecret>,
    ) -> Result<&SendState, WalletError> {
        let draft = match (&self.state, &self.draft) {
            (
                SendState::Confirm { .. } | SendState::PasswordRequired | SendState::TwoStepSecretRequired { .. },
                Some(draft),
            ) => draft.clone(),
            _ => return Err(WalletError::ValidationError("nothing to send".into())),
        };

        self.state = SendState::Sending;
        self.state = self.orchestrator.submit(&draft, password, pay_password).await;
        Ok(&self.state)
    }

    /// Back from a side exit to the confirm screen.
    pub fn back_to_confirm(&mut self) {
        if let Some(draft) = &self.draft {
            if matches!(self.state, SendState::PasswordRequired | SendState::TwoStepSecretRequired { .. }) {
                self.state = SendState::Confirm { draft: draft.clone() };
            }
        }
    }

    /// Starts over from the input screen.
    pub fn reset(&mut self) {
        self.state = SendState::Input;
        self.draft = None;
        *self.latest_fee.lock() = None;
    }
}
