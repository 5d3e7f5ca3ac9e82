pub mod abi;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod record;
