//! Common test utilities

#![allow(dead_code)]

use std::sync::OnceLock;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

use atomic_ledger::handlers::CreateAccountCommand;
use atomic_ledger::{db, Account, AccountHandler, Currency, LedgerStore, OperationContext};

/// A clean database, held exclusively until dropped
pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

fn db_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Setup test database - migrate and truncate all ledger tables.
///
/// Returns `None` when `DATABASE_URL` is not set, so callers can skip.
pub async fn setup_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let guard = db_lock().lock().await;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::run_migrations(&pool).await.expect("Failed to run migrations");

    sqlx::query("TRUNCATE TABLE transfers, entries, accounts RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    Some(TestDb { pool, _guard: guard })
}

/// Open a USD account with an opening balance
pub async fn open_account<S: LedgerStore>(
    accounts: &AccountHandler<S>,
    owner: &str,
    balance: i64,
) -> Account {
    accounts
        .create_account(
            &OperationContext::new(),
            CreateAccountCommand::new(owner, Currency::Usd).with_balance(balance),
        )
        .await
        .expect("Failed to open account")
}
