//! atomic_ledger Library
//!
//! Accounts, entries and transfers with all-or-nothing fund movement
//! between accounts.

pub mod config;
pub mod db;
pub mod domain;
pub mod handlers;
pub mod logging;
pub mod store;

mod error;

pub use config::{Config, LogFormat, OverdraftPolicy};
pub use domain::{Account, AccountId, Amount, AmountError, Currency, Entry, OperationContext, Transfer};
pub use error::{LedgerError, LedgerResult};
pub use handlers::{AccountHandler, TransferCommand, TransferHandler, TransferResult};
pub use store::{run_atomic, InMemoryLedgerStore, LedgerStore, PgLedgerStore};
