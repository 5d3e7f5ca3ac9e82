//! Purpose: Library crate behind the `bookledger` CLI, web view, and tests.
//! Exports: `api` (ledger backends, sessions, catalog controller), `core` (ABI codec,
//!          records, reconciliation, errors).
//! Role: All ledger access flows through `core::ledger::Ledger`; binaries never speak JSON-RPC.
//! Invariants: Core modules are synchronous and free of runtime state.
pub mod api;
pub mod core;
