//! Transaction wrapper
//!
//! Runs a sequence of store operations as one all-or-nothing unit of work.

use futures::future::BoxFuture;
use std::future::Future;

use crate::domain::OperationContext;
use crate::error::{LedgerError, LedgerResult};

use super::{LedgerStore, UnitOfWork};

/// Run `work` inside a fresh unit of work.
///
/// Commits when `work` succeeds. Otherwise rolls back and returns the
/// original error, or a `RollbackFailed` naming both failures when the
/// rollback errors too. The context deadline bounds both `begin` and
/// `work`; on expiry the work is dropped and rolled back.
pub async fn run_atomic<S, T, F>(store: &S, context: &OperationContext, work: F) -> LedgerResult<T>
where
    S: LedgerStore + ?Sized,
    T: Send,
    F: for<'c> FnOnce(&'c mut S::UnitOfWork) -> BoxFuture<'c, LedgerResult<T>> + Send,
{
    if context.is_expired() {
        return Err(deadline_exceeded());
    }

    let mut unit = within_deadline(context, store.begin()).await?;
    tracing::debug!(correlation_id = ?context.correlation_id, "Unit of work started");

    let outcome = within_deadline(context, work(&mut unit)).await;

    match outcome {
        Ok(value) => {
            unit.commit().await?;
            tracing::debug!(correlation_id = ?context.correlation_id, "Unit of work committed");
            Ok(value)
        }
        Err(err) => match unit.rollback().await {
            Ok(()) => {
                tracing::debug!(
                    correlation_id = ?context.correlation_id,
                    error = %err,
                    "Unit of work rolled back"
                );
                Err(err)
            }
            Err(rollback_err) => {
                tracing::warn!(
                    correlation_id = ?context.correlation_id,
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed"
                );
                Err(LedgerError::rollback_failed(err, rollback_err))
            }
        },
    }
}

async fn within_deadline<T, Fut>(context: &OperationContext, fut: Fut) -> LedgerResult<T>
where
    Fut: Future<Output = LedgerResult<T>>,
{
    match context.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded())),
        None => fut.await,
    }
}

fn deadline_exceeded() -> LedgerError {
    LedgerError::Transient("deadline exceeded".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use crate::store::{CreateAccountParams, InMemoryLedgerStore, LedgerQueries};
    use std::time::Duration;

    fn params(owner: &str) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            balance: 100,
            currency: Currency::Usd,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = InMemoryLedgerStore::new();
        let context = OperationContext::new();

        let account = run_atomic(&store, &context, |unit| {
            Box::pin(async move { unit.create_account(params("alice")).await })
        })
        .await
        .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.accounts, vec![account]);
    }

    #[tokio::test]
    async fn test_error_rolls_back_writes() {
        let store = InMemoryLedgerStore::new();
        let context = OperationContext::new();

        let result: LedgerResult<()> = run_atomic(&store, &context, |unit| {
            Box::pin(async move {
                unit.create_account(params("alice")).await?;
                Err::<(), _>(LedgerError::Validation("abort".to_string()))
            })
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert!(store.snapshot().accounts.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_failure_is_composed() {
        let store = InMemoryLedgerStore::new();
        store.fail_rollback(true);
        let context = OperationContext::new();

        let result: LedgerResult<()> = run_atomic(&store, &context, |unit| {
            Box::pin(async move {
                unit.create_account(params("alice")).await?;
                Err::<(), _>(LedgerError::Validation("abort".to_string()))
            })
        })
        .await;

        match result {
            Err(LedgerError::RollbackFailed { error, rollback }) => {
                assert!(matches!(*error, LedgerError::Validation(_)));
                assert!(rollback.to_string().contains("rollback"));
            }
            other => panic!("Expected RollbackFailed, got: {:?}", other),
        }
        assert!(store.snapshot().accounts.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_discards_writes() {
        let store = InMemoryLedgerStore::new();
        store.fail_commit(true);
        let context = OperationContext::new();

        let result = run_atomic(&store, &context, |unit| {
            Box::pin(async move { unit.create_account(params("alice")).await })
        })
        .await;

        assert!(result.is_err());
        assert!(store.snapshot().accounts.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_never_begins() {
        let store = InMemoryLedgerStore::new();
        let context = OperationContext::new().with_deadline(tokio::time::Instant::now());

        let result = run_atomic(&store, &context, |unit| {
            Box::pin(async move { unit.create_account(params("alice")).await })
        })
        .await;

        assert!(matches!(result, Err(LedgerError::Transient(_))));
        assert!(store.snapshot().accounts.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_aborts_stalled_work() {
        let store = InMemoryLedgerStore::new();
        let context = OperationContext::new().with_timeout(Duration::from_millis(20));

        let result: LedgerResult<()> = run_atomic(&store, &context, |unit| {
            Box::pin(async move {
                unit.create_account(params("alice")).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), LedgerError>(())
            })
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("deadline"));
        assert!(store.snapshot().accounts.is_empty());
    }
}
