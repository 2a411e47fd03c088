//! Transfer Handler
//!
//! Coordinates a fund transfer: one transfer row, two entries and two
//! balance updates inside a single unit of work.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::config::{Config, OverdraftPolicy};
use crate::domain::{AccountId, Amount, OperationContext};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{run_atomic, CreateEntryParams, CreateTransferParams, LedgerQueries, LedgerStore};

use super::lock_order::{transfer_legs, Side};
use super::{TransferCommand, TransferResult};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Transfer input after validation
#[derive(Debug, Clone, Copy)]
struct ValidatedTransfer {
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: Amount,
}

impl TryFrom<TransferCommand> for ValidatedTransfer {
    type Error = LedgerError;

    fn try_from(command: TransferCommand) -> Result<Self, Self::Error> {
        for (field, id) in [
            ("from_account_id", command.from_account_id),
            ("to_account_id", command.to_account_id),
        ] {
            if id < 1 {
                return Err(LedgerError::Validation(format!(
                    "{} must be positive (got {})",
                    field, id
                )));
            }
        }

        if command.from_account_id == command.to_account_id {
            return Err(LedgerError::Validation(
                "Cannot transfer to the same account".to_string(),
            ));
        }

        let amount = Amount::new(command.amount)?;

        Ok(Self {
            from_account_id: command.from_account_id,
            to_account_id: command.to_account_id,
            amount,
        })
    }
}

/// Handler for transfers between accounts
pub struct TransferHandler<S> {
    store: Arc<S>,
    overdraft_policy: OverdraftPolicy,
    max_retries: u32,
    retry_backoff: Duration,
    default_timeout: Option<Duration>,
}

impl<S: LedgerStore> TransferHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            overdraft_policy: OverdraftPolicy::Reject,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            default_timeout: None,
        }
    }

    pub fn from_config(store: Arc<S>, config: &Config) -> Self {
        Self::new(store)
            .with_overdraft_policy(config.overdraft_policy)
            .with_max_retries(config.transfer_max_retries)
            .with_default_timeout(config.transfer_timeout)
    }

    pub fn with_overdraft_policy(mut self, policy: OverdraftPolicy) -> Self {
        self.overdraft_policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Deadline applied when the caller's context has none
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Execute the transfer command
    ///
    /// Debits `from_account_id`, credits `to_account_id` and records the
    /// transfer with one entry per side, all or nothing. Transient
    /// failures are retried up to the configured limit while the deadline
    /// allows; nothing partial is ever committed, so a retry is safe.
    ///
    /// Not idempotent: the same command executed twice moves funds twice.
    pub async fn transfer_funds(
        &self,
        context: &OperationContext,
        command: TransferCommand,
    ) -> LedgerResult<TransferResult> {
        let request = ValidatedTransfer::try_from(command)?;

        let mut context = match self.default_timeout {
            Some(timeout) => context.clone().or_timeout(timeout),
            None => context.clone(),
        };
        let correlation_id = context.ensure_correlation_id();

        let span = tracing::info_span!(
            "transfer_funds",
            %correlation_id,
            from_account_id = request.from_account_id,
            to_account_id = request.to_account_id,
            amount = request.amount.value(),
        );

        self.transfer_with_retry(&context, request).instrument(span).await
    }

    async fn transfer_with_retry(
        &self,
        context: &OperationContext,
        request: ValidatedTransfer,
    ) -> LedgerResult<TransferResult> {
        let mut attempt: u32 = 0;

        loop {
            match self.try_transfer(context, request).await {
                Ok(result) => {
                    tracing::info!(
                        transfer_id = result.transfer.id,
                        from_balance = result.from_account.balance,
                        to_balance = result.to_account.balance,
                        "Transfer committed"
                    );
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_backoff * attempt;
                    // No room for another attempt: report this failure as is.
                    if !context.has_time_for(backoff) {
                        return Err(err);
                    }
                    tracing::warn!(
                        error = %err,
                        "Transient failure, retrying transfer (attempt {}/{})",
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_transfer(
        &self,
        context: &OperationContext,
        request: ValidatedTransfer,
    ) -> LedgerResult<TransferResult> {
        let overdraft_policy = self.overdraft_policy;
        run_atomic(self.store.as_ref(), context, move |unit| {
            Box::pin(execute_transfer(unit, request, overdraft_policy))
        })
        .await
    }
}

/// The transfer body. Runs against one unit of work; any error aborts it.
async fn execute_transfer<Q: LedgerQueries>(
    unit: &mut Q,
    request: ValidatedTransfer,
    overdraft_policy: OverdraftPolicy,
) -> LedgerResult<TransferResult> {
    let amount = request.amount;

    let transfer = unit
        .create_transfer(CreateTransferParams {
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: amount.value(),
        })
        .await?;

    let from_entry = unit
        .create_entry(CreateEntryParams {
            account_id: request.from_account_id,
            amount: amount.debit_delta(),
        })
        .await?;

    let to_entry = unit
        .create_entry(CreateEntryParams {
            account_id: request.to_account_id,
            amount: amount.credit_delta(),
        })
        .await?;

    // Lower account id first, whichever side it is on.
    let [first, second] = transfer_legs(request.from_account_id, request.to_account_id, amount);
    let first_account = unit.add_account_balance(first.account_id, first.delta).await?;
    let second_account = unit.add_account_balance(second.account_id, second.delta).await?;

    let (from_account, to_account) = match first.side {
        Side::Debit => (first_account, second_account),
        Side::Credit => (second_account, first_account),
    };

    if overdraft_policy == OverdraftPolicy::Reject && from_account.balance < 0 {
        return Err(LedgerError::Invariant(format!(
            "account {} would be overdrawn: balance {} after debit of {}",
            from_account.id, from_account.balance, amount
        )));
    }

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}
