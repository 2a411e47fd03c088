//! Command definitions
//!
//! Commands carry already-authorized input from the request layer into
//! the ledger core.

use serde::{Deserialize, Serialize};

use crate::domain::{Account, AccountId, Currency, Entry, Transfer};
use crate::error::{LedgerError, LedgerResult};

/// Largest page a listing may return
pub const MAX_PAGE_SIZE: i64 = 100;

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move funds between two accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Minor currency units
    pub amount: i64,
}

impl TransferCommand {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Result of a committed transfer. Accounts are their post-update rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

// =========================================================================
// CreateAccountCommand
// =========================================================================

/// Command to open an account for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub owner: String,
    pub currency: Currency,
    /// Opening balance in minor units
    pub balance: i64,
}

impl CreateAccountCommand {
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance: 0,
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }
}

// =========================================================================
// Page
// =========================================================================

/// One-based page selector for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPage")]
pub struct Page {
    pub page_id: i64,
    pub page_size: i64,
}

#[derive(Deserialize)]
struct RawPage {
    page_id: i64,
    page_size: i64,
}

impl TryFrom<RawPage> for Page {
    type Error = LedgerError;

    fn try_from(raw: RawPage) -> Result<Self, Self::Error> {
        Page::new(raw.page_id, raw.page_size)
    }
}

impl Page {
    pub fn new(page_id: i64, page_size: i64) -> LedgerResult<Self> {
        if page_id < 1 {
            return Err(LedgerError::Validation(format!(
                "page_id must be at least 1 (got {})",
                page_id
            )));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LedgerError::Validation(format!(
                "page_size must be between 1 and {} (got {})",
                MAX_PAGE_SIZE, page_size
            )));
        }
        if (page_id - 1).checked_mul(page_size).is_none() {
            return Err(LedgerError::Validation(format!(
                "page_id {} is out of range for page_size {}",
                page_id, page_size
            )));
        }
        Ok(Self { page_id, page_size })
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page_id - 1) * self.page_size
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page_id: 1,
            page_size: 10,
        }
    }
}
