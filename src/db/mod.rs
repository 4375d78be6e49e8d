mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    retention: Arc<dyn RetentionStore>,
    /// Present only for backends with server-side advisory locks.
    advisory_locks: Option<Arc<dyn AdvisoryLockRepo>>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres {
        write: sqlx::PgPool,
        read: Option<sqlx::PgPool>,
    },
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            retention: Arc::new(sqlite::SqliteRetentionStore::new(pool.clone())),
            advisory_locks: None,
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            retention: Arc::new(postgres::PostgresRetentionStore::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            advisory_locks: Some(Arc::new(postgres::PostgresAdvisoryLockRepo::dedicated(
                &write_pool,
            ))),
        };
        DbPool {
            inner: PoolStorage::Postgres {
                write: write_pool,
                read: read_pool,
            },
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                use std::{str::FromStr, time::Duration};

                use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

                let pool_options = || {
                    PgPoolOptions::new()
                        .min_connections(cfg.min_connections)
                        .max_connections(cfg.max_connections)
                        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
                        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
                };

                let write_options = PgConnectOptions::from_str(&cfg.url)?.ssl_mode(cfg.ssl_mode.into());
                let write_pool = pool_options().connect_with(write_options).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    let read_options =
                        PgConnectOptions::from_str(read_url)?.ssl_mode(cfg.ssl_mode.into());
                    Some(pool_options().connect_with(read_options).await?)
                } else {
                    None
                };

                Ok(Self::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Get the retention store
    pub fn retention(&self) -> Arc<dyn RetentionStore> {
        Arc::clone(&self.repos.retention)
    }

    /// Get the advisory lock repository, if the backend has one
    pub fn advisory_locks(&self) -> Option<Arc<dyn AdvisoryLockRepo>> {
        self.repos.advisory_locks.clone()
    }

    /// Short backend name for logs.
    pub fn backend(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres { .. } => "postgres",
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres { write, read } => {
                // Check both write and read pools
                sqlx::query("SELECT 1").execute(write).await?;
                if let Some(read) = read {
                    sqlx::query("SELECT 1").execute(read).await?;
                }
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
