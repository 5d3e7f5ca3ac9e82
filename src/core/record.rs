//! Purpose: Ledger record mirror, the validity predicate, and uid text parsing.
//! Exports: `Record`, `Book`, `parse_uid`.
//! Role: Read-only view of what the ledger reports for one slot.
//! Invariants: A record is valid iff its uid is present, non-zero, and its title is non-empty.
//! Invariants: Availability is derived from the borrower sentinel, never from the ledger flag.
use serde::Serialize;

use crate::core::abi::Address;

/// One slot as returned by the ledger's record accessor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    /// `None` when the ledger returned no data for the slot.
    pub uid: Option<u64>,
    pub title: String,
    pub borrower: Address,
    /// Ledger-side flag; carried for completeness, not consulted.
    pub is_available: bool,
}

impl Record {
    pub fn new(uid: u64, title: impl Into<String>, borrower: Address) -> Self {
        Self {
            uid: Some(uid),
            title: title.into(),
            borrower,
            is_available: borrower.is_zero(),
        }
    }

    /// A slot the ledger has nothing for.
    pub fn vacant() -> Self {
        Self {
            uid: None,
            title: String::new(),
            borrower: Address::ZERO,
            is_available: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.uid, Some(uid) if uid != 0) && !self.title.is_empty()
    }

    /// Validated form of the record, or `None` when it fails the validity predicate.
    pub fn into_book(self) -> Option<Book> {
        if !self.is_valid() {
            return None;
        }
        let uid = self.uid?;
        Some(Book {
            uid,
            title: self.title,
            borrower: self.borrower,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Book {
    pub uid: u64,
    pub title: String,
    pub borrower: Address,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.borrower.is_zero()
    }
}

/// Integer-prefix parse of user-entered uid text.
///
/// Leading whitespace and a single `+` are accepted, then the longest run of
/// ASCII digits is taken (`"12abc"` reads as 12). Anything without leading
/// digits, negative input, or a value past `u64` yields `None`.
pub fn parse_uid(input: &str) -> Option<u64> {
    let trimmed = input.trim_start();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits_len = unsigned
        .bytes()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    unsigned[..digits_len].parse().ok()
}
