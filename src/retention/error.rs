use thiserror::Error;

use crate::db::DbError;

/// Raised when a policy fails validation at registration time. Nothing is
/// stored when this is returned.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    #[error("Table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("Unknown strategy '{0}' (expected destroy, delete_all or archive)")]
    UnknownStrategy(String),

    #[error("Retention period of {secs}s is shorter than the one hour minimum")]
    PeriodTooShort { secs: u64 },

    #[error("Retention period of {secs}s is out of range")]
    PeriodOutOfRange { secs: u64 },

    #[error("batch_limit must be a positive integer, got {0}")]
    InvalidBatchLimit(i64),

    #[error("Failed to inspect schema: {0}")]
    Store(#[from] DbError),
}

/// Raised by a cleanup run. The entity's lock has been released by the time
/// the caller sees this.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Archive table '{table}' does not exist")]
    ArchiveTableMissing { table: String },

    #[error("Archive table '{table}' is missing columns: {}", missing.join(", "))]
    ArchiveSchemaMismatch { table: String, missing: Vec<String> },

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type RetentionResult<T> = Result<T, RetentionError>;
