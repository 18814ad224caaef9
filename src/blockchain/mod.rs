pub mod bioforest;
pub mod bitcoin;
pub mod evm;
pub mod http;
pub mod mock;
pub mod registry;
pub mod traits;
pub mod tron;

pub use registry::{AdapterFactory, ChainAdapterRegistry, DefaultAdapterFactory};
pub use traits::{
    AssetService, ChainAdapter, FeeEstimate, IdentityService, KeyMaterial, SignedTransaction,
    TransactionService, TransactionStatus, TransferIntent, UnsignedTransaction,
};
