//! Account Handler
//!
//! Account CRUD and read-only ledger queries for the request layer.

use std::sync::Arc;

use crate::domain::{Account, AccountId, Entry, OperationContext, Transfer};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{
    run_atomic, CreateAccountParams, LedgerQueries, LedgerStore, ListAccountsParams,
    ListEntriesParams, ListTransfersParams,
};

use super::{CreateAccountCommand, Page};

fn require_positive_id(entity: &str, id: i64) -> LedgerResult<()> {
    if id < 1 {
        return Err(LedgerError::Validation(format!(
            "{} id must be positive (got {})",
            entity, id
        )));
    }
    Ok(())
}

/// Handler for account and ledger reads
pub struct AccountHandler<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> AccountHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Open an account. One account per owner and currency.
    pub async fn create_account(
        &self,
        context: &OperationContext,
        command: CreateAccountCommand,
    ) -> LedgerResult<Account> {
        if command.owner.trim().is_empty() {
            return Err(LedgerError::Validation("owner must not be empty".to_string()));
        }
        if command.balance < 0 {
            return Err(LedgerError::Validation(format!(
                "opening balance must not be negative (got {})",
                command.balance
            )));
        }

        let params = CreateAccountParams {
            owner: command.owner,
            balance: command.balance,
            currency: command.currency,
        };
        let account = run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.create_account(params).await })
        })
        .await?;

        tracing::info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            "Account created"
        );
        Ok(account)
    }

    pub async fn get_account(&self, context: &OperationContext, id: AccountId) -> LedgerResult<Account> {
        require_positive_id("account", id)?;
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.get_account(id).await })
        })
        .await
    }

    pub async fn list_accounts(
        &self,
        context: &OperationContext,
        owner: &str,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        let params = ListAccountsParams {
            owner: owner.to_string(),
            limit: page.limit(),
            offset: page.offset(),
        };
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.list_accounts(params).await })
        })
        .await
    }

    pub async fn get_entry(&self, context: &OperationContext, id: i64) -> LedgerResult<Entry> {
        require_positive_id("entry", id)?;
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.get_entry(id).await })
        })
        .await
    }

    /// Entries of an account, oldest first
    pub async fn list_entries(
        &self,
        context: &OperationContext,
        account_id: AccountId,
        page: Page,
    ) -> LedgerResult<Vec<Entry>> {
        require_positive_id("account", account_id)?;
        let params = ListEntriesParams {
            account_id,
            limit: page.limit(),
            offset: page.offset(),
        };
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.list_entries(params).await })
        })
        .await
    }

    pub async fn get_transfer(&self, context: &OperationContext, id: i64) -> LedgerResult<Transfer> {
        require_positive_id("transfer", id)?;
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.get_transfer(id).await })
        })
        .await
    }

    /// Transfers sent from `from_account_id` or received by
    /// `to_account_id`, oldest first
    pub async fn list_transfers(
        &self,
        context: &OperationContext,
        from_account_id: AccountId,
        to_account_id: AccountId,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        require_positive_id("account", from_account_id)?;
        require_positive_id("account", to_account_id)?;
        let params = ListTransfersParams {
            from_account_id,
            to_account_id,
            limit: page.limit(),
            offset: page.offset(),
        };
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(async move { unit.list_transfers(params).await })
        })
        .await
    }
}
