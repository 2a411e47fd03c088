//! Domain module
//!
//! Core ledger types: entities, amounts, and per-operation context.

pub mod amount;
pub mod context;
pub mod models;

pub use amount::{Amount, AmountError};
pub use context::OperationContext;
pub use models::{Account, AccountId, Currency, Entry, Transfer};
