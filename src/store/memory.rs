//! In-process ledger store
//!
//! A `LedgerStore` held entirely in memory. Units of work stage their
//! writes privately and publish them on commit. Balance updates take a
//! per-account async row lock that is held until the unit of work ends,
//! which gives the same blocking behaviour as PostgreSQL row locks.
//!
//! Faults can be injected for testing: failing the balance update of a
//! chosen account, failing commit, or failing rollback. Every applied
//! balance update is appended to a log in lock-acquisition order.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{Account, AccountId, Entry, Transfer};
use crate::error::{LedgerError, LedgerResult};

use super::{
    CreateAccountParams, CreateEntryParams, CreateTransferParams, LedgerQueries, LedgerStore,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, UnitOfWork,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One applied balance update, in the order row locks were taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub unit_id: u64,
    pub account_id: AccountId,
    pub delta: i64,
}

/// Committed contents of the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub accounts: Vec<Account>,
    pub entries: Vec<Entry>,
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    row_locks: HashMap<AccountId, Arc<RowLock<()>>>,
    next_account_id: i64,
    next_entry_id: i64,
    next_transfer_id: i64,
}

impl LedgerState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn row_lock(&mut self, account_id: AccountId) -> Arc<RowLock<()>> {
        self.row_locks.entry(account_id).or_default().clone()
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_balance_update_for: Option<AccountId>,
    fail_commit: bool,
    fail_rollback: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<LedgerState>,
    faults: Mutex<FaultPlan>,
    balance_log: Mutex<Vec<BalanceUpdate>>,
    next_unit_id: AtomicU64,
    lock_timeout: Duration,
    update_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(what: &str) -> LedgerError {
    LedgerError::Database(sqlx::Error::Protocol(format!("injected {} failure", what)))
}

/// In-memory ledger store with real row locking
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Bound on how long a balance update waits for a row lock
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LedgerState::default()),
                faults: Mutex::new(FaultPlan::default()),
                balance_log: Mutex::new(Vec::new()),
                next_unit_id: AtomicU64::new(1),
                lock_timeout,
                update_delay: Mutex::new(None),
            }),
        }
    }

    /// Fail every balance update of `account_id` until cleared
    pub fn fail_balance_update_for(&self, account_id: Option<AccountId>) {
        lock(&self.shared.faults).fail_balance_update_for = account_id;
    }

    /// Sleep while holding each row lock, widening interleaving windows
    /// for concurrency tests. Existing rows and faults are kept.
    pub fn with_update_delay(self, delay: Duration) -> Self {
        self.set_update_delay(Some(delay));
        self
    }

    pub fn set_update_delay(&self, delay: Option<Duration>) {
        *lock(&self.shared.update_delay) = delay;
    }

    pub fn fail_commit(&self, fail: bool) {
        lock(&self.shared.faults).fail_commit = fail;
    }

    pub fn fail_rollback(&self, fail: bool) {
        lock(&self.shared.faults).fail_rollback = fail;
    }

    pub fn clear_faults(&self) {
        *lock(&self.shared.faults) = FaultPlan::default();
    }

    /// Balance updates applied so far, committed or not
    pub fn balance_log(&self) -> Vec<BalanceUpdate> {
        lock(&self.shared.balance_log).clone()
    }

    /// Committed rows, ordered by id
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = lock(&self.shared.state);
        LedgerSnapshot {
            accounts: state.accounts.values().cloned().collect(),
            entries: state.entries.values().cloned().collect(),
            transfers: state.transfers.values().cloned().collect(),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> LedgerResult<InMemoryUnitOfWork> {
        Ok(InMemoryUnitOfWork {
            shared: self.shared.clone(),
            unit_id: self.shared.next_unit_id.fetch_add(1, Ordering::Relaxed),
            row_guards: HashMap::new(),
            balances: BTreeMap::new(),
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            transfers: BTreeMap::new(),
        })
    }
}

/// Unit of work over the in-memory store.
///
/// Staged rows are only visible through this handle until commit. Row
/// guards are released when the handle is consumed or dropped.
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    unit_id: u64,
    row_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    balances: BTreeMap<AccountId, i64>,
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

impl InMemoryUnitOfWork {
    /// Account as seen by this unit: staged rows and balances win
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        let mut account = match self.accounts.get(&id) {
            Some(account) => account.clone(),
            None => lock(&self.shared.state).accounts.get(&id)?.clone(),
        };
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Some(account)
    }

    fn require_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::not_found("Account", id))
    }

    fn owner_currency_taken(&self, state: &LedgerState, params: &CreateAccountParams) -> bool {
        state
            .accounts
            .values()
            .chain(self.accounts.values())
            .any(|a| a.owner == params.owner && a.currency == params.currency)
    }

    async fn acquire_row_lock(&mut self, account_id: AccountId) -> LedgerResult<()> {
        if self.row_guards.contains_key(&account_id) {
            return Ok(());
        }

        let row_lock = lock(&self.shared.state).row_lock(account_id);
        let guard = tokio::time::timeout(self.shared.lock_timeout, row_lock.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::Transient(format!(
                    "lock wait timeout on account {} after {:?}",
                    account_id, self.shared.lock_timeout
                ))
            })?;

        self.row_guards.insert(account_id, guard);
        Ok(())
    }
}

fn page<T>(rows: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl LedgerQueries for InMemoryUnitOfWork {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        let id = {
            let mut state = lock(&self.shared.state);
            if self.owner_currency_taken(&state, &params) {
                return Err(LedgerError::Conflict(format!(
                    "account for owner {} in {} already exists",
                    params.owner, params.currency
                )));
            }
            LedgerState::next_id(&mut state.next_account_id)
        };

        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.require_account(id)
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>> {
        let mut ids: Vec<AccountId> = {
            let state = lock(&self.shared.state);
            state
                .accounts
                .values()
                .filter(|a| a.owner == params.owner)
                .map(|a| a.id)
                .collect()
        };
        ids.extend(
            self.accounts
                .values()
                .filter(|a| a.owner == params.owner)
                .map(|a| a.id),
        );
        ids.sort_unstable();

        let rows = ids
            .into_iter()
            .filter_map(|id| self.visible_account(id))
            .collect();
        Ok(page(rows, params.limit, params.offset))
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        self.require_account(params.account_id)?;

        let id = LedgerState::next_id(&mut lock(&self.shared.state).next_entry_id);
        let entry = Entry {
            id,
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> LedgerResult<Entry> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        lock(&self.shared.state)
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Entry", id))
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> LedgerResult<Vec<Entry>> {
        let mut rows: Vec<Entry> = lock(&self.shared.state)
            .entries
            .values()
            .chain(self.entries.values())
            .filter(|e| e.account_id == params.account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.id);
        Ok(page(rows, params.limit, params.offset))
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;
        if params.amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "transfer amount must be positive (got {})",
                params.amount
            )));
        }

        let id = LedgerState::next_id(&mut lock(&self.shared.state).next_transfer_id);
        let transfer = Transfer {
            id,
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> LedgerResult<Transfer> {
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        lock(&self.shared.state)
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Transfer", id))
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> LedgerResult<Vec<Transfer>> {
        let mut rows: Vec<Transfer> = lock(&self.shared.state)
            .transfers
            .values()
            .chain(self.transfers.values())
            .filter(|t| {
                t.from_account_id == params.from_account_id || t.to_account_id == params.to_account_id
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.id);
        Ok(page(rows, params.limit, params.offset))
    }

    async fn add_account_balance(&mut self, account_id: AccountId, delta: i64) -> LedgerResult<Account> {
        self.require_account(account_id)?;
        self.acquire_row_lock(account_id).await?;

        let delay = *lock(&self.shared.update_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.shared.faults).fail_balance_update_for == Some(account_id) {
            return Err(injected("balance update"));
        }

        // Re-read under the row lock: the committed balance cannot move
        // while we hold it.
        let mut account = self.require_account(account_id)?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::Invariant(format!(
                "balance overflow on account {}: {} + {}",
                account_id, account.balance, delta
            ))
        })?;
        self.balances.insert(account_id, account.balance);

        lock(&self.shared.balance_log).push(BalanceUpdate {
            unit_id: self.unit_id,
            account_id,
            delta,
        });

        Ok(account)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self) -> LedgerResult<()> {
        if lock(&self.shared.faults).fail_commit {
            return Err(injected("commit"));
        }

        let mut state = lock(&self.shared.state);
        for account in self.accounts.values() {
            let taken = state
                .accounts
                .values()
                .any(|a| a.owner == account.owner && a.currency == account.currency);
            if taken {
                return Err(LedgerError::Conflict(format!(
                    "account for owner {} in {} already exists",
                    account.owner, account.currency
                )));
            }
        }

        state.accounts.extend(self.accounts);
        state.entries.extend(self.entries);
        state.transfers.extend(self.transfers);
        for (account_id, balance) in self.balances {
            if let Some(account) = state.accounts.get_mut(&account_id) {
                account.balance = balance;
            }
        }

        // Row guards drop with `self.row_guards` after the state is
        // published.
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        if lock(&self.shared.faults).fail_rollback {
            return Err(injected("rollback"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    async fn seed(store: &InMemoryLedgerStore, owner: &str, balance: i64) -> Account {
        let mut unit = store.begin().await.unwrap();
        let account = unit
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                balance,
                currency: Currency::Usd,
            })
            .await
            .unwrap();
        unit.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = InMemoryLedgerStore::new();
        let account = seed(&store, "alice", 100).await;

        let mut writer = store.begin().await.unwrap();
        writer.add_account_balance(account.id, -40).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.get_account(account.id).await.unwrap().balance, 100);
        assert_eq!(writer.get_account(account.id).await.unwrap().balance, 60);

        writer.commit().await.unwrap();
        assert_eq!(reader.get_account(account.id).await.unwrap().balance, 60);
    }

    #[tokio::test]
    async fn test_duplicate_owner_currency_conflicts() {
        let store = InMemoryLedgerStore::new();
        seed(&store, "alice", 0).await;

        let mut unit = store.begin().await.unwrap();
        let err = unit
            .create_account(CreateAccountParams {
                owner: "alice".to_string(),
                balance: 0,
                currency: Currency::Usd,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let eur = unit
            .create_account(CreateAccountParams {
                owner: "alice".to_string(),
                balance: 0,
                currency: Currency::Eur,
            })
            .await;
        assert!(eur.is_ok());
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let mut unit = store.begin().await.unwrap();

        let err = unit.add_account_balance(99, 10).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "Account", id: 99 }));

        let err = unit
            .create_entry(CreateEntryParams { account_id: 99, amount: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_overflow_is_invariant_violation() {
        let store = InMemoryLedgerStore::new();
        let account = seed(&store, "alice", i64::MAX - 1).await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.add_account_balance(account.id, 2).await.unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_writer() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let account = seed(&store, "alice", 100).await;

        let mut first = store.begin().await.unwrap();
        first.add_account_balance(account.id, 10).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.add_account_balance(account.id, 10).await.unwrap_err();
        assert!(err.is_retryable());

        first.rollback().await.unwrap();
        let updated = second.add_account_balance(account.id, 10).await.unwrap();
        assert_eq!(updated.balance, 110);
    }

    #[tokio::test]
    async fn test_opposite_lock_order_times_out() {
        // Two units locking the same pair in opposite orders wait on each
        // other; only the lock timeout breaks the cycle.
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(100));
        let a = seed(&store, "alice", 100).await;
        let b = seed(&store, "bob", 100).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.add_account_balance(a.id, -1).await.unwrap();
        second.add_account_balance(b.id, -1).await.unwrap();

        let (r1, r2) = tokio::join!(
            first.add_account_balance(b.id, 1),
            second.add_account_balance(a.id, 1)
        );
        assert!(r1.is_err() && r2.is_err());
        assert!(r1.unwrap_err().is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_delay_keeps_existing_state() {
        let store = InMemoryLedgerStore::new();
        let account = seed(&store, "alice", 100).await;
        store.fail_commit(true);

        let store = store.with_update_delay(Duration::from_millis(10));
        assert_eq!(store.snapshot().accounts, vec![account.clone()]);

        let mut unit = store.begin().await.unwrap();
        let started = tokio::time::Instant::now();
        unit.add_account_balance(account.id, 5).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(unit.commit().await.is_err(), "fault plan survives");

        store.set_update_delay(None);
        store.clear_faults();
        let mut unit = store.begin().await.unwrap();
        assert_eq!(unit.add_account_balance(account.id, 5).await.unwrap().balance, 105);
        unit.commit().await.unwrap();
        assert_eq!(store.balance_log().len(), 2);
    }

    #[tokio::test]
    async fn test_balance_log_records_updates() {
        let store = InMemoryLedgerStore::new();
        let account = seed(&store, "alice", 0).await;

        let mut unit = store.begin().await.unwrap();
        unit.add_account_balance(account.id, 5).await.unwrap();
        unit.commit().await.unwrap();

        let log = store.balance_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].account_id, account.id);
        assert_eq!(log[0].delta, 5);
    }

    #[tokio::test]
    async fn test_list_transfers_matches_either_side() {
        let store = InMemoryLedgerStore::new();
        let a = seed(&store, "alice", 100).await;
        let b = seed(&store, "bob", 100).await;
        let c = seed(&store, "carol", 100).await;

        let mut unit = store.begin().await.unwrap();
        for (from, to) in [(a.id, b.id), (b.id, a.id), (c.id, b.id), (b.id, c.id)] {
            unit.create_transfer(CreateTransferParams {
                from_account_id: from,
                to_account_id: to,
                amount: 1,
            })
            .await
            .unwrap();
        }
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        let rows = unit
            .list_transfers(ListTransfersParams {
                from_account_id: a.id,
                to_account_id: a.id,
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let paged = unit
            .list_transfers(ListTransfersParams {
                from_account_id: b.id,
                to_account_id: b.id,
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 2);
        assert!(paged[0].id < paged[1].id);
    }
}
