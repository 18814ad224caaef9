pub mod pending_tx;
pub mod send;
pub mod wallet;

pub use pending_tx::{PendingTransaction, PendingTxLedger, PendingTxStatus, PendingTxStore};
pub use send::{SendOrchestrator, SendOutcome, SendRequest, SendSession, SendState};
pub use wallet::WalletService;
