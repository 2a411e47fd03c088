//! Error handling module
//!
//! Centralized error taxonomy for the ledger core and the classification
//! of PostgreSQL failures into it.

use crate::domain::AmountError;

/// Ledger-wide Result type
pub type LedgerResult<T> = Result<T, LedgerError>;

/// SQLSTATE codes the ledger reacts to
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const QUERY_CANCELED: &str = "57014";
}

/// Ledger error types
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed or out-of-range input, rejected before any mutation
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Referenced row does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Uniqueness or referential violation on account creation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lock-wait timeout, deadlock, serialization failure or lost
    /// connection. Nothing was committed, so the whole operation may be
    /// retried.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A ledger invariant would be broken (overflow, overdraft)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// The unit of work failed and so did its rollback
    #[error("tx err: {error}, rb err: {rollback}")]
    RollbackFailed {
        #[source]
        error: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },

    /// Unclassified storage error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Compose a work failure with the failure of its rollback
    pub fn rollback_failed(error: LedgerError, rollback: LedgerError) -> Self {
        Self::RollbackFailed {
            error: Box::new(error),
            rollback: Box::new(rollback),
        }
    }

    /// Stable machine-readable code for the excluded request layer
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Transient(_) => "transient",
            LedgerError::Invariant(_) => "invariant",
            LedgerError::RollbackFailed { error, .. } => error.error_code(),
            LedgerError::Database(_) => "database_error",
            LedgerError::Migration(_) => "migration_error",
            LedgerError::Config(_) => "config_error",
        }
    }

    /// Check if retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transient(_) => true,
            LedgerError::RollbackFailed { error, .. } => error.is_retryable(),
            _ => false,
        }
    }

    /// Classify a failed insert that references accounts: a foreign key
    /// violation means the referenced account is absent.
    pub(crate) fn from_reference(err: sqlx::Error, account_id: i64) -> Self {
        if sqlstate_of(&err).as_deref() == Some(sqlstate::FOREIGN_KEY_VIOLATION) {
            return Self::not_found("Account", account_id);
        }
        Self::from(err)
    }
}

impl From<AmountError> for LedgerError {
    fn from(err: AmountError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

fn sqlstate_of(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        let message = match &err {
            sqlx::Error::Database(db) => db.message().to_string(),
            other => other.to_string(),
        };

        match sqlstate_of(&err).as_deref() {
            Some(sqlstate::UNIQUE_VIOLATION) | Some(sqlstate::FOREIGN_KEY_VIOLATION) => {
                LedgerError::Conflict(message)
            }
            Some(sqlstate::CHECK_VIOLATION) => LedgerError::Validation(message),
            Some(sqlstate::NUMERIC_VALUE_OUT_OF_RANGE) => {
                LedgerError::Invariant(format!("balance overflow: {}", message))
            }
            Some(sqlstate::LOCK_NOT_AVAILABLE)
            | Some(sqlstate::DEADLOCK_DETECTED)
            | Some(sqlstate::SERIALIZATION_FAILURE)
            | Some(sqlstate::QUERY_CANCELED) => LedgerError::Transient(message),
            Some(_) => LedgerError::Database(err),
            None => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                    LedgerError::Transient(message)
                }
                _ => LedgerError::Database(err),
            },
        }
    }
}
