use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, pool::PoolConnection, postgres::PgPoolOptions};

use crate::db::{
    error::{DbError, DbResult},
    repos::{AdvisoryLockGuard, AdvisoryLockRepo},
};

/// Connections reserved for advisory locks, i.e. how many entity types one
/// process can hold locked at once.
pub const ADVISORY_LOCK_CONNECTIONS: u32 = 8;

/// Upper bound on opening a fresh lock connection.
const LOCK_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Session-level `pg_try_advisory_lock`. Each held lock pins one pooled
/// connection until it is released.
///
/// Acquisition never queues behind other pool users: it takes an idle
/// connection, opens a new one while the pool has room, and otherwise fails
/// at once with [`DbError::PoolExhausted`].
pub struct PostgresAdvisoryLockRepo {
    pool: PgPool,
    max_connections: u32,
}

impl PostgresAdvisoryLockRepo {
    pub fn new(pool: PgPool) -> Self {
        let max_connections = pool.options().get_max_connections();
        Self {
            pool,
            max_connections,
        }
    }

    /// A repo on its own small pool, connecting the way `pool` does, so held
    /// locks never take connections from store queries.
    pub fn dedicated(pool: &PgPool) -> Self {
        let lock_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(ADVISORY_LOCK_CONNECTIONS)
            .acquire_timeout(LOCK_CONNECT_TIMEOUT)
            .connect_lazy_with((*pool.connect_options()).clone());
        Self::new(lock_pool)
    }

    async fn connection(&self) -> DbResult<PoolConnection<Postgres>> {
        if let Some(conn) = self.pool.try_acquire() {
            return Ok(conn);
        }
        if self.pool.size() >= self.max_connections {
            tracing::warn!(
                max_connections = self.max_connections,
                "Every advisory lock connection is in use"
            );
            return Err(DbError::PoolExhausted(format!(
                "all {} advisory lock connections are held",
                self.max_connections
            )));
        }
        Ok(self.pool.acquire().await?)
    }
}

#[async_trait]
impl AdvisoryLockRepo for PostgresAdvisoryLockRepo {
    async fn try_lock(&self, key: i64) -> DbResult<Option<Box<dyn AdvisoryLockGuard>>> {
        let mut conn = self.connection().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(Box::new(PgAdvisoryLock {
            key,
            conn: Some(conn),
        })))
    }
}

struct PgAdvisoryLock {
    key: i64,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl AdvisoryLockGuard for PgAdvisoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    async fn unlock(self: Box<Self>) -> DbResult<()> {
        let mut this = self;
        let Some(mut conn) = this.conn.take() else {
            return Ok(());
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(this.key)
            .fetch_one(&mut *conn)
            .await;
        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(key = this.key, "Advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // The session may still hold the lock; don't hand it back to the pool.
                conn.close_on_drop();
                Err(e.into())
            }
        }
    }
}

impl Drop for PgAdvisoryLock {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            tracing::warn!(
                key = self.key,
                "Advisory lock dropped without release, closing its connection"
            );
            conn.close_on_drop();
        }
    }
}
