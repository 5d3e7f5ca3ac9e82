//! Purpose: The seam between catalog logic and whatever ledger backend answers it.
//! Exports: `Ledger`, `LedgerEvent`, `EventBatch`, `TxHash`.
//! Role: Blocking trait implemented by the JSON-RPC client, the in-memory ledger, and the
//!       disconnected placeholder used when the provider bridge is missing.
//! Invariants: Record indexes are 1-based; index 0 is never requested by this crate.
//! Invariants: Write methods only request a mutation; they never confirm it landed.
use std::fmt;

use serde::Serialize;

use crate::core::abi::Address;
use crate::core::error::Error;
use crate::core::record::Record;

pub type LedgerResult<T> = Result<T, Error>;

/// Hash identifying a submitted transaction, as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Change notifications the ledger emits.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Borrowed { uid: u64, borrower: Address },
    Returned { uid: u64 },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventBatch {
    pub events: Vec<LedgerEvent>,
    /// Cursor to pass on the next poll.
    pub next: u64,
}

pub trait Ledger: Send + Sync {
    fn chain_id(&self) -> LedgerResult<u64>;

    /// Accounts the provider can act for, preferred account first.
    fn accounts(&self) -> LedgerResult<Vec<Address>>;

    fn book_count(&self) -> LedgerResult<u64>;

    fn book(&self, index: u64) -> LedgerResult<Record>;

    fn add_book(&self, from: Address, uid: u64, title: &str) -> LedgerResult<TxHash>;

    fn borrow_book(&self, from: Address, uid: u64, borrower: Address) -> LedgerResult<TxHash>;

    fn return_book(&self, from: Address, uid: u64) -> LedgerResult<TxHash>;

    /// Notifications emitted at or after `cursor`.
    ///
    /// With `None` the backend returns no events and a cursor positioned at the
    /// current head, so watching starts from "now".
    fn events_since(&self, cursor: Option<u64>) -> LedgerResult<EventBatch>;
}
