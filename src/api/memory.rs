//! Purpose: In-process ledger with contract-like rules, for offline trials and tests.
//! Exports: `MemoryLedger`.
//! Role: Stand-in for the deployed ledger behind the same `Ledger` trait.
//! Invariants: Records are stored in insertion order; index i maps to the i-th insert (1-based).
//! Invariants: Each accepted write advances a block counter; events are tagged with that block.
//! Notes: Failure injection knobs simulate transport errors without touching stored state.
use std::sync::{Mutex, MutexGuard};

use crate::core::abi::Address;
use crate::core::error::{Error, ErrorKind};
use crate::core::ledger::{EventBatch, Ledger, LedgerEvent, LedgerResult, TxHash};
use crate::core::record::Record;

const DEV_CHAIN_ID: u64 = 31_337;

pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    records: Vec<Record>,
    accounts: Vec<Address>,
    block: u64,
    events: Vec<(u64, LedgerEvent)>,
    tx_counter: u64,
    failing_writes: usize,
    failing_reads_from: Option<u64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: Vec::new(),
                accounts: vec![default_account()],
                block: 0,
                events: Vec::new(),
                tx_counter: 0,
                failing_writes: 0,
                failing_reads_from: None,
            }),
        }
    }

    pub fn with_accounts(self, accounts: Vec<Address>) -> Self {
        self.lock().accounts = accounts;
        self
    }

    /// Append a raw slot, bypassing the write rules (lets tests seed invalid slots).
    pub fn push_record(&self, record: Record) {
        self.lock().records.push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Make the next `count` writes fail as transport errors.
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Make reads of slot `index` and later fail; `0` also fails the count read.
    pub fn fail_reads_from(&self, index: u64) {
        self.lock().failing_reads_from = Some(index);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_writes = 0;
        state.failing_reads_from = None;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn check_read(&self, index: u64) -> LedgerResult<()> {
        match self.failing_reads_from {
            Some(from) if index >= from => Err(simulated_failure("eth_call")),
            _ => Ok(()),
        }
    }

    fn check_write(&mut self) -> LedgerResult<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(simulated_failure("eth_sendTransaction"));
        }
        Ok(())
    }

    fn find_mut(&mut self, uid: u64) -> LedgerResult<&mut Record> {
        self.records
            .iter_mut()
            .find(|record| record.is_valid() && record.uid == Some(uid))
            .ok_or_else(|| rejected("book does not exist"))
    }

    fn commit(&mut self, event: Option<LedgerEvent>) -> TxHash {
        self.block += 1;
        self.tx_counter += 1;
        if let Some(event) = event {
            self.events.push((self.block, event));
        }
        TxHash(format!("0x{:064x}", self.tx_counter))
    }
}

impl Ledger for MemoryLedger {
    fn chain_id(&self) -> LedgerResult<u64> {
        Ok(DEV_CHAIN_ID)
    }

    fn accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self.lock().accounts.clone())
    }

    fn book_count(&self) -> LedgerResult<u64> {
        let state = self.lock();
        state.check_read(0)?;
        Ok(state.records.len() as u64)
    }

    fn book(&self, index: u64) -> LedgerResult<Record> {
        let state = self.lock();
        state.check_read(index)?;
        let slot = index
            .checked_sub(1)
            .and_then(|slot| usize::try_from(slot).ok())
            .and_then(|slot| state.records.get(slot));
        Ok(slot.cloned().unwrap_or_else(Record::vacant))
    }

    fn add_book(&self, _from: Address, uid: u64, title: &str) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.check_write()?;
        if uid == 0 {
            return Err(rejected("uid must be non-zero"));
        }
        if title.is_empty() {
            return Err(rejected("title must not be empty"));
        }
        if state
            .records
            .iter()
            .any(|record| record.is_valid() && record.uid == Some(uid))
        {
            return Err(rejected("book already exists"));
        }
        state.records.push(Record::new(uid, title, Address::ZERO));
        Ok(state.commit(None))
    }

    fn borrow_book(&self, _from: Address, uid: u64, borrower: Address) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.check_write()?;
        if borrower.is_zero() {
            return Err(rejected("borrower must not be the zero address"));
        }
        let record = state.find_mut(uid)?;
        if !record.borrower.is_zero() {
            return Err(rejected("book is already borrowed"));
        }
        record.borrower = borrower;
        record.is_available = false;
        Ok(state.commit(Some(LedgerEvent::Borrowed { uid, borrower })))
    }

    fn return_book(&self, _from: Address, uid: u64) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.check_write()?;
        let record = state.find_mut(uid)?;
        if record.borrower.is_zero() {
            return Err(rejected("book is not borrowed"));
        }
        record.borrower = Address::ZERO;
        record.is_available = true;
        Ok(state.commit(Some(LedgerEvent::Returned { uid })))
    }

    fn events_since(&self, cursor: Option<u64>) -> LedgerResult<EventBatch> {
        let state = self.lock();
        let next = state.block + 1;
        let Some(cursor) = cursor else {
            return Ok(EventBatch {
                events: Vec::new(),
                next,
            });
        };
        let events = state
            .events
            .iter()
            .filter(|(block, _)| *block >= cursor)
            .map(|(_, event)| event.clone())
            .collect();
        Ok(EventBatch { events, next })
    }
}

fn default_account() -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = 1;
    Address::new(bytes)
}

fn rejected(message: &str) -> Error {
    Error::new(ErrorKind::Rejected)
        .with_message(format!("execution reverted: {message}"))
        .with_method("eth_sendTransaction")
}

fn simulated_failure(method: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("simulated transport failure")
        .with_method(method)
}

#[cfg(test)]
mod tests {
    use super::MemoryLedger;
    use crate::core::abi::Address;
    use crate::core::error::ErrorKind;
    use crate::core::ledger::{Ledger, LedgerEvent};

    fn account() -> Address {
        MemoryLedger::new().accounts().expect("accounts")[0]
    }

    #[test]
    fn add_rejects_duplicates_and_zero_uid() {
        let ledger = MemoryLedger::new();
        ledger.add_book(account(), 1, "A").expect("add");
        let dup = ledger.add_book(account(), 1, "Again").expect_err("dup");
        assert_eq!(dup.kind(), ErrorKind::Rejected);
        let zero = ledger.add_book(account(), 0, "Zero").expect_err("zero");
        assert_eq!(zero.kind(), ErrorKind::Rejected);
        assert_eq!(ledger.book_count().expect("count"), 1);
    }

    #[test]
    fn borrow_and_return_toggle_borrower() {
        let ledger = MemoryLedger::new();
        ledger.add_book(account(), 7, "Seven").expect("add");
        ledger.borrow_book(account(), 7, account()).expect("borrow");
        assert_eq!(ledger.book(1).expect("book").borrower, account());
        let again = ledger
            .borrow_book(account(), 7, account())
            .expect_err("already borrowed");
        assert_eq!(again.kind(), ErrorKind::Rejected);

        ledger.return_book(account(), 7).expect("return");
        assert!(ledger.book(1).expect("book").borrower.is_zero());
        let twice = ledger.return_book(account(), 7).expect_err("not borrowed");
        assert_eq!(twice.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn out_of_range_slot_is_vacant() {
        let ledger = MemoryLedger::new();
        let record = ledger.book(3).expect("book");
        assert!(record.uid.is_none());
        assert!(!record.is_valid());
    }

    #[test]
    fn injected_write_failure_leaves_state_alone() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_writes(1);
        let err = ledger.add_book(account(), 1, "A").expect_err("fail");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(ledger.book_count().expect("count"), 0);
        ledger.add_book(account(), 1, "A").expect("second attempt");
    }

    #[test]
    fn events_start_from_cursor() {
        let ledger = MemoryLedger::new();
        let start = ledger.events_since(None).expect("events");
        assert!(start.events.is_empty());

        ledger.add_book(account(), 1, "A").expect("add");
        ledger.borrow_book(account(), 1, account()).expect("borrow");
        let batch = ledger.events_since(Some(start.next)).expect("events");
        assert_eq!(
            batch.events,
            vec![LedgerEvent::Borrowed {
                uid: 1,
                borrower: account()
            }]
        );
        let empty = ledger.events_since(Some(batch.next)).expect("events");
        assert!(empty.events.is_empty());
    }
}
