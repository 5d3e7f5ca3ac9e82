//! Purpose: Define the public Rust API boundary for bookledger.
//! Exports: Ledger backends, session setup, the catalog controller, and core types.
//! Role: Surface consumed by the `bookledger` binary and integration tests.
//! Invariants: Wire codecs stay private; callers see `Ledger`, `Record`, and `Book`.

mod catalog;
mod contract;
mod memory;
mod provider;
mod rpc;

pub use crate::core::abi::Address;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::ledger::{EventBatch, Ledger, LedgerEvent, LedgerResult, TxHash};
pub use crate::core::reconcile::{Partition, reconcile};
pub use crate::core::record::{Book, Record, parse_uid};
pub use catalog::{
    Catalog, CatalogSettings, CatalogSnapshot, DEFAULT_POLL_INTERVAL, DEFAULT_SETTLE_DELAY,
    EventWatcher, RefreshMode, RefreshOutcome, Submission,
};
pub use contract::{
    DEFAULT_LEDGER_ADDRESS, DEFAULT_RPC_URL, DEFAULT_TIMEOUT, LedgerAbi, LedgerConfig, RpcLedger,
};
pub use memory::MemoryLedger;
pub use provider::{DisconnectedLedger, Session, connect};
pub use rpc::RpcClient;
