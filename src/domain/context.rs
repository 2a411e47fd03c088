//! Operation Context
//!
//! Carries tracing metadata and the caller's deadline into the ledger core.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Context for an operation, used for tracing and cancellation.
///
/// The deadline is propagated into the unit of work so that a transfer
/// stalled on a row lock aborts with rollback instead of hanging.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Correlation ID for request tracing
    pub correlation_id: Option<Uuid>,

    /// Point in time after which the operation must give up
    pub deadline: Option<Instant>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Create context that expires `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Fill in a deadline when the caller did not supply one.
    /// An existing deadline is never extended.
    pub fn or_timeout(mut self, timeout: Duration) -> Self {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + timeout);
        }
        self
    }

    /// Whether the deadline has already passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Whether waiting `wait` from now still ends before the deadline
    pub fn has_time_for(&self, wait: Duration) -> bool {
        self.deadline.map_or(true, |deadline| Instant::now() + wait < deadline)
    }
}
