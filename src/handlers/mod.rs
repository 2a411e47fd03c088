//! Command Handlers module
//!
//! Handlers validate commands and run them against the ledger store,
//! each operation inside one unit of work.

mod account_handler;
mod commands;
pub mod lock_order;
mod transfer_handler;


pub use account_handler::AccountHandler;
pub use commands::*;
pub use transfer_handler::TransferHandler;
