//! Non-blocking, entity-type-scoped cleanup locks.
//!
//! Two backends:
//!
//! - **Database** (PostgreSQL): session advisory locks keyed by [`lock_key`].
//!   Holds across every process sharing the database.
//! - **Process** (SQLite, or no advisory lock support): an in-process lock
//!   table. Only excludes concurrent cleanups within this process.
//!
//! Acquisition is try-once. A contended lock is reported immediately, never
//! waited on.

use std::{future::Future, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::RetentionError;
use crate::db::{AdvisoryLockGuard, AdvisoryLockRepo, DbPool, DbResult};

pub const DEFAULT_LOCK_NAMESPACE: &str = "retention";

/// Advisory lock key for `table` within `namespace`: the first four bytes of
/// SHA-256 over `"<namespace>:<table>"`, masked to a non-negative 31-bit value.
pub fn lock_key(namespace: &str, table: &str) -> i64 {
    let digest = Sha256::digest(format!("{}:{}", namespace, table).as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    i64::from(prefix & 0x7FFF_FFFF)
}

/// Which exclusion guarantee a [`LockCoordinator`] provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Excludes every process connected to the same database.
    Database,
    /// Excludes only tasks within this process.
    Process,
}

impl std::fmt::Display for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Result of running a body under a cleanup lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locked<T> {
    Acquired(T),
    Contended,
}

/// In-process lock table keyed by lock name.
#[derive(Debug, Default, Clone)]
pub struct InProcessLocks {
    held: Arc<DashMap<String, ()>>,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, name: &str) -> Option<InProcessGuard> {
        match self.held.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InProcessGuard {
                    held: Arc::clone(&self.held),
                    name: name.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.contains_key(name)
    }
}

/// Releases its in-process lock on drop.
#[derive(Debug)]
pub struct InProcessGuard {
    held: Arc<DashMap<String, ()>>,
    name: String,
}

impl Drop for InProcessGuard {
    fn drop(&mut self) {
        self.held.remove(&self.name);
    }
}

/// A held cleanup lock.
pub enum LockGuard {
    Database(Box<dyn AdvisoryLockGuard>),
    Process(InProcessGuard),
}

impl LockGuard {
    pub async fn release(self) -> DbResult<()> {
        match self {
            Self::Database(guard) => guard.unlock().await,
            Self::Process(guard) => {
                drop(guard);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(guard) => f.debug_tuple("Database").field(&guard.key()).finish(),
            Self::Process(guard) => f.debug_tuple("Process").field(&guard.name).finish(),
        }
    }
}

enum Backend {
    Database(Arc<dyn AdvisoryLockRepo>),
    Process(InProcessLocks),
}

/// Hands out per-entity-type cleanup locks.
pub struct LockCoordinator {
    namespace: String,
    backend: Backend,
}

impl LockCoordinator {
    /// Use database advisory locks when `advisory` is given, otherwise fall
    /// back to an in-process lock table.
    pub fn new(namespace: impl Into<String>, advisory: Option<Arc<dyn AdvisoryLockRepo>>) -> Self {
        let namespace = namespace.into();
        match advisory {
            Some(repo) => Self {
                namespace,
                backend: Backend::Database(repo),
            },
            None => {
                tracing::warn!(
                    namespace = %namespace,
                    "Database has no advisory locks; cleanup locks only exclude tasks in this process"
                );
                Self::in_process(namespace)
            }
        }
    }

    pub fn in_process(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            backend: Backend::Process(InProcessLocks::new()),
        }
    }

    pub fn from_pool(db: &DbPool, namespace: impl Into<String>) -> Self {
        Self::new(namespace, db.advisory_locks())
    }

    pub fn scope(&self) -> LockScope {
        match self.backend {
            Backend::Database(_) => LockScope::Database,
            Backend::Process(_) => LockScope::Process,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Try once to lock `entity`. `None` if someone else holds it.
    pub async fn try_acquire(&self, entity: &str) -> DbResult<Option<LockGuard>> {
        match &self.backend {
            Backend::Database(repo) => {
                let key = lock_key(&self.namespace, entity);
                Ok(repo.try_lock(key).await?.map(LockGuard::Database))
            }
            Backend::Process(locks) => {
                let name = format!("{}:{}", self.namespace, entity);
                Ok(locks.try_acquire(&name).map(LockGuard::Process))
            }
        }
    }

    /// Run `body` while holding the lock for `entity`. The lock is released
    /// on every exit path, including errors. A failed release is logged and
    /// does not mask the body's outcome.
    pub async fn with_lock<T, F, Fut>(
        &self,
        entity: &str,
        body: F,
    ) -> Result<Locked<T>, RetentionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RetentionError>>,
    {
        let Some(guard) = self.try_acquire(entity).await? else {
            return Ok(Locked::Contended);
        };

        let outcome = body().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(
                entity = %entity,
                error = %e,
                "Failed to release cleanup lock"
            );
        }

        outcome.map(Locked::Acquired)
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("namespace", &self.namespace)
            .field("scope", &self.scope())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;

    #[test]
    fn test_lock_key_is_deterministic_and_31_bit() {
        let a = lock_key("retention", "events");
        assert_eq!(a, lock_key("retention", "events"));
        assert_ne!(a, lock_key("retention", "sessions"));
        assert_ne!(a, lock_key("other", "events"));

        for table in ["a", "events", "audit_logs", "x_archive", "sessions"] {
            let key = lock_key(DEFAULT_LOCK_NAMESPACE, table);
            assert!((0..=i64::from(i32::MAX)).contains(&key), "{table}: {key}");
        }
    }

    #[test]
    fn test_lock_key_matches_sha256_prefix() {
        let digest = Sha256::digest(b"retention:events");
        let expected =
            i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF);
        assert_eq!(lock_key("retention", "events"), expected);
    }

    #[test]
    fn test_in_process_table_excludes_and_releases_on_drop() {
        let locks = InProcessLocks::new();
        let guard = locks.try_acquire("retention:events").unwrap();
        assert!(locks.try_acquire("retention:events").is_none());
        assert!(locks.try_acquire("retention:sessions").is_some());

        drop(guard);
        assert!(!locks.is_held("retention:events"));
        assert!(locks.try_acquire("retention:events").is_some());
    }

    #[tokio::test]
    async fn test_with_lock_reports_contention_without_running_body() {
        let coordinator = LockCoordinator::in_process("retention");
        assert_eq!(coordinator.scope(), LockScope::Process);

        let held = coordinator.try_acquire("events").await.unwrap().unwrap();
        let mut ran = false;
        let outcome = coordinator
            .with_lock("events", || {
                ran = true;
                async { Ok::<_, RetentionError>(1) }
            })
            .await
            .unwrap();
        assert_eq!(outcome, Locked::Contended);
        assert!(!ran);

        held.release().await.unwrap();
        let outcome = coordinator
            .with_lock("events", || async { Ok::<_, RetentionError>(7) })
            .await
            .unwrap();
        assert_eq!(outcome, Locked::Acquired(7));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let coordinator = LockCoordinator::in_process("retention");

        let result: Result<Locked<()>, _> = coordinator
            .with_lock("events", || async {
                Err(RetentionError::Db(DbError::Internal("boom".to_string())))
            })
            .await;
        assert!(result.is_err());

        assert!(coordinator.try_acquire("events").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_body_releases_lock() {
        let coordinator = LockCoordinator::in_process("retention");

        {
            let fut = coordinator.with_lock("events", || async {
                std::future::pending::<()>().await;
                Ok::<_, RetentionError>(())
            });
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), fut).await;
        }

        assert!(coordinator.try_acquire("events").await.unwrap().is_some());
    }
}
