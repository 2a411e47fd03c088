//! Ledger Store module
//!
//! Persistence seam for accounts, entries and transfers. Every query runs
//! against a unit-of-work handle, so ownership of the transactional
//! context is explicit at each call site.

mod atomic;
mod memory;
mod postgres;

pub use atomic::run_atomic;
pub use memory::{BalanceUpdate, InMemoryLedgerStore, InMemoryUnitOfWork, LedgerSnapshot};
pub use postgres::{PgLedgerStore, PgUnitOfWork};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Account, AccountId, Currency, Entry, Transfer};
use crate::error::LedgerResult;

/// Parameters for inserting an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}

/// Parameters for inserting an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}

/// Parameters for inserting a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Accounts of one owner, ordered by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAccountsParams {
    pub owner: String,
    pub limit: i64,
    pub offset: i64,
}

/// Entries of one account, ordered by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntriesParams {
    pub account_id: AccountId,
    pub limit: i64,
    pub offset: i64,
}

/// Transfers leaving `from_account_id` or arriving at `to_account_id`,
/// ordered by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTransfersParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub limit: i64,
    pub offset: i64,
}

/// Queries available inside a unit of work
#[async_trait]
pub trait LedgerQueries: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account>;

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account>;

    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry>;

    async fn get_entry(&mut self, id: i64) -> LedgerResult<Entry>;

    async fn list_entries(&mut self, params: ListEntriesParams) -> LedgerResult<Vec<Entry>>;

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer>;

    async fn get_transfer(&mut self, id: i64) -> LedgerResult<Transfer>;

    async fn list_transfers(&mut self, params: ListTransfersParams) -> LedgerResult<Vec<Transfer>>;

    /// Atomically add `delta` to the account balance and return the
    /// updated row. Takes the account's row lock until the unit of work
    /// ends.
    ///
    /// # Errors
    /// - `NotFound` if the account does not exist
    /// - `Invariant` if the new balance would overflow
    /// - `Transient` if the row lock could not be acquired in time
    async fn add_account_balance(&mut self, account_id: AccountId, delta: i64) -> LedgerResult<Account>;
}

/// A transactional handle. Consumed by commit or rollback; dropping it
/// without either discards its writes.
#[async_trait]
pub trait UnitOfWork: LedgerQueries {
    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;
}

/// Source of units of work
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type UnitOfWork: UnitOfWork + 'static;

    /// Begin a new unit of work
    async fn begin(&self) -> LedgerResult<Self::UnitOfWork>;
}
