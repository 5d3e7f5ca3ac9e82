//! Purpose: Scan every ledger slot and split the valid books into available and borrowed.
//! Exports: `Partition`, `reconcile`.
//! Role: The only catalog logic that is not pass-through; callers commit its output wholesale.
//! Invariants: Slots are read 1..=count in ascending order; slot 0 is never read.
//! Invariants: Invalid slots are logged with their index and skipped; they never abort the scan.
//! Invariants: Any fetch failure aborts the scan and no partial partition is returned.
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::error::Error;
use crate::core::ledger::Ledger;
use crate::core::record::Book;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Partition {
    pub available: Vec<Book>,
    pub borrowed: Vec<Book>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.available.len() + self.borrowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.borrowed.is_empty()
    }
}

pub fn reconcile(ledger: &dyn Ledger) -> Result<Partition, Error> {
    let count = ledger.book_count()?;
    let mut partition = Partition::default();
    for index in 1..=count {
        let record = ledger.book(index).map_err(|err| err.with_index(index))?;
        match record.into_book() {
            Some(book) if book.is_available() => partition.available.push(book),
            Some(book) => partition.borrowed.push(book),
            None => warn!(index, "book has invalid properties; skipping"),
        }
    }
    debug!(
        count,
        available = partition.available.len(),
        borrowed = partition.borrowed.len(),
        "catalog reconciled"
    );
    Ok(partition)
}
