//! The retention engine: registered policies plus the cleanup run for one
//! entity type.
//!
//! A run takes the entity type's cleanup lock, counts the expired rows, and
//! then either reports that count (dry run) or removes rows with the policy's
//! strategy, never more than `batch_limit` of them.

use std::sync::Arc;

use super::{
    archive::archive_expired,
    clock::{Clock, SystemClock},
    error::{PolicyError, RetentionResult},
    lock::{LockCoordinator, Locked},
    policy::{
        EntityDescriptor, GuardDecision, PolicyRegistry, RegisteredPolicy, RetentionPolicy,
        Strategy,
    },
    predicate::ExpiredQuery,
    result::{CleanupResult, SkipReason},
};
use crate::{
    config::{ArchiveConfig, PolicyConfig, RetentionConfig},
    db::{DbPool, RetentionStore},
    models::RowId,
    observability::metrics,
};

/// Ids fetched per keyset page by the destroy strategy.
const DESTROY_PAGE_SIZE: u64 = 100;

pub struct RetentionEngine {
    store: Arc<dyn RetentionStore>,
    registry: PolicyRegistry,
    locks: LockCoordinator,
    clock: Arc<dyn Clock>,
    archive: ArchiveConfig,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn RetentionStore>, locks: LockCoordinator) -> Self {
        Self {
            store,
            registry: PolicyRegistry::new(),
            locks,
            clock: Arc::new(SystemClock),
            archive: ArchiveConfig::default(),
        }
    }

    /// Engine over `db` using the lock namespace and archive sizes from
    /// `config`. Policies are not registered; see [`Self::register_from_config`].
    pub fn from_pool(db: &DbPool, config: &RetentionConfig) -> Self {
        Self::new(
            db.retention(),
            LockCoordinator::from_pool(db, config.lock_namespace.as_str()),
        )
        .with_archive_config(config.archive)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_archive_config(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn RetentionStore> {
        &self.store
    }

    /// Validate `config` against the live schema and register it for `entity`.
    pub async fn register(
        &self,
        entity: EntityDescriptor,
        config: &PolicyConfig,
    ) -> Result<RetentionPolicy, PolicyError> {
        self.registry
            .register(self.store.as_ref(), entity, config)
            .await
    }

    /// Register every `[[retention.policies]]` entry. Stops at the first
    /// invalid entry; entries before it stay registered.
    pub async fn register_from_config(&self, config: &RetentionConfig) -> Result<usize, PolicyError> {
        for entry in &config.policies {
            let entity = EntityDescriptor::new(entry.table.as_str())
                .with_id_column(entry.id_column.as_str());
            if let Err(e) = self.register(entity, &entry.policy()).await {
                tracing::error!(
                    entity = %entry.table,
                    error = %e,
                    "Invalid retention policy"
                );
                return Err(e);
            }
        }
        Ok(config.policies.len())
    }

    /// Rows currently expired under `entity`'s policy, ignoring `batch_limit`.
    /// `None` if no policy is registered.
    pub async fn expired_count(&self, entity: &str) -> RetentionResult<Option<u64>> {
        let Some(registered) = self.registry.lookup(entity) else {
            return Ok(None);
        };
        let query = self.expired_query(&registered);
        Ok(Some(self.store.count_expired(&query).await?))
    }

    fn expired_query(&self, registered: &RegisteredPolicy) -> ExpiredQuery {
        ExpiredQuery::new(&registered.entity, &registered.policy, self.clock.now())
    }

    /// Run one cleanup for `entity`. `None` if no policy is registered.
    ///
    /// Lock contention yields a skipped result rather than an error. Errors
    /// are returned after the lock has been released.
    pub async fn cleanup(
        &self,
        entity: &str,
        dry_run: bool,
    ) -> RetentionResult<Option<CleanupResult>> {
        let Some(registered) = self.registry.lookup(entity) else {
            tracing::debug!(entity = %entity, "No retention policy registered");
            return Ok(None);
        };

        let outcome = self
            .locks
            .with_lock(entity, || self.run_locked(&registered, dry_run))
            .await;

        match outcome {
            Ok(Locked::Acquired(result)) => Ok(Some(result)),
            Ok(Locked::Contended) => {
                tracing::info!(
                    entity = %entity,
                    scope = %self.locks.scope(),
                    "Skipping cleanup, another run holds the lock"
                );
                metrics::record_retention_skip(entity);
                Ok(Some(CleanupResult::skipped(SkipReason::Locked)))
            }
            Err(e) => {
                tracing::error!(entity = %entity, error = %e, "Cleanup failed");
                metrics::record_retention_error(entity);
                Err(e)
            }
        }
    }

    async fn run_locked(
        &self,
        registered: &RegisteredPolicy,
        dry_run: bool,
    ) -> RetentionResult<CleanupResult> {
        let entity = registered.entity.table.as_str();
        let policy = &registered.policy;
        let query = self.expired_query(registered);
        let total = self.store.count_expired(&query).await?;

        if dry_run {
            tracing::info!(
                entity = %entity,
                strategy = %policy.strategy,
                cutoff = %query.cutoff,
                expired = total,
                "DRY RUN: would remove expired rows"
            );
            return Ok(CleanupResult::dry_run(total));
        }

        tracing::info!(
            entity = %entity,
            strategy = %policy.strategy,
            cutoff = %query.cutoff,
            expired = total,
            batch_limit = policy.batch_limit,
            "Starting cleanup"
        );

        let result = match policy.strategy {
            Strategy::Destroy => {
                let (count, failed) = self.destroy(registered, &query).await?;
                CleanupResult::destroyed(count, failed, total)
            }
            Strategy::DeleteAll => {
                let count = self.delete_all(registered, &query).await?;
                CleanupResult::completed(count, total)
            }
            Strategy::Archive => {
                let count = archive_expired(
                    self.store.as_ref(),
                    registered,
                    &query,
                    policy.batch_limit,
                    &self.archive,
                )
                .await?;
                CleanupResult::completed(count, total)
            }
        };

        metrics::record_retention_removed(entity, policy.strategy.as_str(), result.count);
        if let Some(failed) = result.failed {
            metrics::record_retention_refused(entity, failed);
        }

        tracing::info!(
            entity = %entity,
            strategy = %policy.strategy,
            removed = result.count,
            failed = result.failed,
            remaining = result.remaining,
            "Cleanup complete"
        );

        Ok(result)
    }

    /// Row-by-row removal consulting the entity's guard. Returns
    /// `(removed, declined)`.
    async fn destroy(
        &self,
        registered: &RegisteredPolicy,
        query: &ExpiredQuery,
    ) -> RetentionResult<(u64, u64)> {
        let entity = &registered.entity;
        let limit = registered.policy.batch_limit;

        let mut count = 0u64;
        let mut failed = 0u64;
        let mut cursor: Option<RowId> = None;

        'pages: loop {
            let budget = limit.saturating_sub(count + failed);
            if budget == 0 {
                break;
            }
            let want = budget.min(DESTROY_PAGE_SIZE);
            let ids = self.store.expired_ids(query, cursor.as_ref(), want).await?;

            for id in &ids {
                if count + failed >= limit {
                    break 'pages;
                }

                // Gone since the page was read.
                let Some(row) = self
                    .store
                    .fetch_row(&entity.table, &entity.id_column, id)
                    .await?
                else {
                    continue;
                };

                if let Some(guard) = entity.guard()
                    && let GuardDecision::Decline(reason) = guard.check(&row)
                {
                    tracing::debug!(
                        entity = %entity.table,
                        id = %id,
                        reason = %reason,
                        "Removal declined"
                    );
                    failed += 1;
                    continue;
                }

                count += self
                    .store
                    .delete_by_ids(&entity.table, &entity.id_column, std::slice::from_ref(id))
                    .await?;
            }

            if (ids.len() as u64) < want {
                break;
            }
            cursor = ids.last().cloned();
        }

        Ok((count, failed))
    }

    async fn delete_all(
        &self,
        registered: &RegisteredPolicy,
        query: &ExpiredQuery,
    ) -> RetentionResult<u64> {
        let entity = &registered.entity;
        let ids = self
            .store
            .expired_ids(query, None, registered.policy.batch_limit)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self
            .store
            .delete_by_ids(&entity.table, &entity.id_column, &ids)
            .await?)
    }
}

impl std::fmt::Debug for RetentionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionEngine")
            .field("policies", &self.registry.entity_types())
            .field("locks", &self.locks)
            .field("archive", &self.archive)
            .finish()
    }
}
