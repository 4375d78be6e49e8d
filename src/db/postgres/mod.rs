mod advisory_locks;
mod common;
mod retention;

pub use advisory_locks::PostgresAdvisoryLockRepo;
pub use retention::PostgresRetentionStore;
