//! Purpose: Open a session with the provider bridge: chain probe plus acting account.
//! Exports: `Session`, `connect`, `DisconnectedLedger`.
//! Role: Single startup step that turns a `LedgerConfig` into the ledger handle the app holds.
//! Invariants: A missing bridge is logged, never fatal; the session then fails every call.
//! Invariants: Only configuration mistakes (bad URL, bad ABI) abort `connect`.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use tracing::{info, warn};

use super::contract::{LedgerConfig, RpcLedger};
use crate::core::abi::Address;
use crate::core::error::{Error, ErrorKind};
use crate::core::ledger::{EventBatch, Ledger, LedgerResult, TxHash};
use crate::core::record::Record;

#[derive(Clone)]
pub struct Session {
    ledger: Arc<dyn Ledger>,
    account: Option<Address>,
    chain_id: Option<u64>,
}

pub fn connect(config: &LedgerConfig) -> Result<Session, Error> {
    let ledger = RpcLedger::from_config(config)?;
    info!(
        rpc = %ledger.rpc().endpoint(),
        ledger = %ledger.address(),
        "connecting to provider bridge"
    );
    Ok(Session::attach(Arc::new(ledger), config.from))
}

impl Session {
    /// Probe `ledger` and pick the acting account (`from`, else the provider's first).
    pub fn attach(ledger: Arc<dyn Ledger>, from: Option<Address>) -> Self {
        let chain_id = match ledger.chain_id() {
            Ok(chain_id) => chain_id,
            Err(err) => {
                warn!(error = %err, "provider bridge unavailable; ledger calls will fail");
                return Self {
                    ledger: Arc::new(DisconnectedLedger::new(err.to_string())),
                    account: from,
                    chain_id: None,
                };
            }
        };

        let account = match from {
            Some(account) => Some(account),
            None => match ledger.accounts() {
                Ok(accounts) => accounts.first().copied(),
                Err(err) => {
                    warn!(error = %err, "failed to read provider accounts");
                    None
                }
            },
        };
        match account {
            Some(account) => info!(chain_id, %account, "provider bridge connected"),
            None => warn!(chain_id, "provider exposes no account; writes will fail"),
        }

        Self {
            ledger,
            account,
            chain_id: Some(chain_id),
        }
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn is_connected(&self) -> bool {
        self.chain_id.is_some()
    }

    pub fn require_account(&self) -> Result<Address, Error> {
        self.account.ok_or_else(no_account_error)
    }
}

pub(crate) fn no_account_error() -> Error {
    Error::new(ErrorKind::Unavailable)
        .with_message("no acting account available from the provider")
        .with_hint("Pass --from <ADDRESS> or unlock an account in the provider.")
}

/// Placeholder ledger used when the bridge could not be reached at startup.
pub struct DisconnectedLedger {
    reason: String,
}

impl DisconnectedLedger {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> LedgerResult<T> {
        Err(Error::new(ErrorKind::Unavailable)
            .with_message(format!("provider bridge unavailable: {}", self.reason))
            .with_hint("Start the JSON-RPC provider or point --rpc-url at a running one."))
    }
}

impl Ledger for DisconnectedLedger {
    fn chain_id(&self) -> LedgerResult<u64> {
        self.unavailable()
    }

    fn accounts(&self) -> LedgerResult<Vec<Address>> {
        self.unavailable()
    }

    fn book_count(&self) -> LedgerResult<u64> {
        self.unavailable()
    }

    fn book(&self, _index: u64) -> LedgerResult<Record> {
        self.unavailable()
    }

    fn add_book(&self, _from: Address, _uid: u64, _title: &str) -> LedgerResult<TxHash> {
        self.unavailable()
    }

    fn borrow_book(&self, _from: Address, _uid: u64, _borrower: Address) -> LedgerResult<TxHash> {
        self.unavailable()
    }

    fn return_book(&self, _from: Address, _uid: u64) -> LedgerResult<TxHash> {
        self.unavailable()
    }

    fn events_since(&self, _cursor: Option<u64>) -> LedgerResult<EventBatch> {
        self.unavailable()
    }
}
