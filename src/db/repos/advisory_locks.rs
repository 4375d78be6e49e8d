use async_trait::async_trait;

use crate::db::error::DbResult;

/// Database-level, session-scoped advisory locks.
///
/// Only backends with server-side advisory locks implement this; the lock
/// coordinator falls back to an in-process table when it's absent.
#[async_trait]
pub trait AdvisoryLockRepo: Send + Sync {
    /// Try once to take the lock for `key`. `None` if another session holds it.
    async fn try_lock(&self, key: i64) -> DbResult<Option<Box<dyn AdvisoryLockGuard>>>;
}

/// A held advisory lock.
///
/// Dropping a guard without calling [`AdvisoryLockGuard::unlock`] must still
/// free the lock, even if less promptly.
#[async_trait]
pub trait AdvisoryLockGuard: Send {
    fn key(&self) -> i64;

    async fn unlock(self: Box<Self>) -> DbResult<()>;
}
