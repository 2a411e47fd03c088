//! Transfer stress tool
//!
//! Run with: cargo run --bin transfer_stress --release -- --transfers 1000 --amount 10
//!
//! Opens two fresh accounts and fires concurrent transfers between them,
//! alternating direction, then checks that no money was created or lost.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use atomic_ledger::handlers::CreateAccountCommand;
use atomic_ledger::{
    db, logging, AccountHandler, Config, Currency, OperationContext, PgLedgerStore, TransferCommand,
    TransferHandler,
};

const OPENING_BALANCE: i64 = 1_000_000;

fn arg_or(args: &[String], flag: &str, default: i64) -> i64 {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    logging::init_tracing(config.log_format);

    let args: Vec<String> = std::env::args().collect();
    let transfer_count = arg_or(&args, "--transfers", 1000).max(1);
    let amount = arg_or(&args, "--amount", 10).max(1);

    let pool = db::connect(&config).await?;
    if !db::check_schema(&pool).await? {
        return Err(anyhow::anyhow!("Database schema incomplete. Run `atomic_ledger migrate`."));
    }

    let store = Arc::new(PgLedgerStore::new(pool.clone()).with_lock_timeout(config.lock_timeout));
    let accounts = AccountHandler::new(store.clone());
    let transfers = Arc::new(TransferHandler::from_config(store, &config));

    let run = uuid::Uuid::new_v4().simple().to_string();
    let context = OperationContext::new();
    let a = accounts
        .create_account(
            &context,
            CreateAccountCommand::new(format!("stress-a-{}", run), Currency::Usd).with_balance(OPENING_BALANCE),
        )
        .await?;
    let b = accounts
        .create_account(
            &context,
            CreateAccountCommand::new(format!("stress-b-{}", run), Currency::Usd).with_balance(OPENING_BALANCE),
        )
        .await?;

    println!("Transfer stress - {} transfers of {} between accounts {} and {}", transfer_count, amount, a.id, b.id);

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(transfer_count as usize);
    for i in 0..transfer_count {
        let transfers = transfers.clone();
        let command = if i % 2 == 0 {
            TransferCommand::new(a.id, b.id, amount)
        } else {
            TransferCommand::new(b.id, a.id, amount)
        };
        tasks.push(tokio::spawn(async move {
            let context = OperationContext::new().with_correlation_id(uuid::Uuid::new_v4());
            (command, transfers.transfer_funds(&context, command).await)
        }));
    }

    let mut committed = 0u64;
    let mut failures: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut expected_a = OPENING_BALANCE;
    for task in futures::future::join_all(tasks).await {
        let (command, outcome) = task?;
        match outcome {
            Ok(_) => {
                committed += 1;
                if command.from_account_id == a.id {
                    expected_a -= amount;
                } else {
                    expected_a += amount;
                }
            }
            Err(err) => *failures.entry(err.error_code()).or_default() += 1,
        }
    }
    let elapsed = start.elapsed();

    let final_a = accounts.get_account(&context, a.id).await?.balance;
    let final_b = accounts.get_account(&context, b.id).await?.balance;
    let conserved = final_a + final_b == 2 * OPENING_BALANCE && final_a == expected_a;

    let report = serde_json::json!({
        "transfers": transfer_count,
        "committed": committed,
        "failed": failures,
        "elapsed_secs": elapsed.as_secs_f64(),
        "transfers_per_sec": committed as f64 / elapsed.as_secs_f64(),
        "final_balances": { "a": final_a, "b": final_b },
        "expected_a": expected_a,
        "conserved": conserved,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    pool.close().await;

    if !conserved {
        return Err(anyhow::anyhow!("Balances do not reconcile"));
    }
    Ok(())
}
