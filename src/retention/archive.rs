//! Archive-then-delete.
//!
//! Expired rows are copied into `<table>_archive` and removed from the source
//! chunk by chunk. Each chunk is its own transaction; a failing chunk is rolled
//! back and re-raised while earlier committed chunks stand.

use std::collections::HashSet;

use super::{
    error::{RetentionError, RetentionResult},
    policy::RegisteredPolicy,
    predicate::ExpiredQuery,
};
use crate::{
    config::ArchiveConfig,
    db::{ArchivePlan, RetentionStore},
    models::RowId,
};

/// Server-assigned timestamp column every archive table carries.
pub const ARCHIVED_AT_COLUMN: &str = "archived_at";

pub fn archive_table_name(table: &str) -> String {
    format!("{}_archive", table)
}

/// Check the destination table and work out which columns to copy.
///
/// Runs before any row is touched.
pub async fn plan_archive(
    store: &dyn RetentionStore,
    registered: &RegisteredPolicy,
    config: &ArchiveConfig,
) -> RetentionResult<ArchivePlan> {
    let source = &registered.entity.table;
    let id_column = &registered.entity.id_column;
    let destination = archive_table_name(source);

    if !store.table_exists(&destination).await? {
        return Err(RetentionError::ArchiveTableMissing { table: destination });
    }

    let destination_columns: HashSet<String> =
        store.columns(&destination).await?.into_iter().collect();
    let columns: Vec<String> = store
        .columns(source)
        .await?
        .into_iter()
        .filter(|c| c != id_column && c != ARCHIVED_AT_COLUMN)
        .collect();

    let mut missing: Vec<String> = columns
        .iter()
        .filter(|c| !destination_columns.contains(*c))
        .cloned()
        .collect();
    if !destination_columns.contains(ARCHIVED_AT_COLUMN) {
        missing.push(ARCHIVED_AT_COLUMN.to_string());
    }
    if !missing.is_empty() {
        return Err(RetentionError::ArchiveSchemaMismatch {
            table: destination,
            missing,
        });
    }

    Ok(ArchivePlan {
        source: source.clone(),
        destination,
        id_column: id_column.clone(),
        columns,
        insert_batch_size: config.insert_batch_size.max(1),
    })
}

/// Move up to `limit` expired rows into the archive table. Returns rows moved.
pub async fn archive_expired(
    store: &dyn RetentionStore,
    registered: &RegisteredPolicy,
    query: &ExpiredQuery,
    limit: u64,
    config: &ArchiveConfig,
) -> RetentionResult<u64> {
    let plan = plan_archive(store, registered, config).await?;
    let chunk_size = config.chunk_size.max(1);

    let mut archived = 0u64;
    let mut cursor: Option<RowId> = None;

    while archived < limit {
        let want = chunk_size.min(limit - archived);
        let ids = store.expired_ids(query, cursor.as_ref(), want).await?;
        if ids.is_empty() {
            break;
        }

        let moved = match store.archive_chunk(&plan, &ids).await {
            Ok(moved) => moved,
            Err(e) => {
                tracing::error!(
                    entity = %plan.source,
                    archive = %plan.destination,
                    chunk_len = ids.len(),
                    archived_so_far = archived,
                    error = %e,
                    "Archive chunk rolled back"
                );
                return Err(e.into());
            }
        };
        archived += moved;

        tracing::debug!(
            entity = %plan.source,
            chunk_len = ids.len(),
            moved,
            archived,
            "Archived chunk"
        );

        if (ids.len() as u64) < want {
            break;
        }
        cursor = ids.last().cloned();
    }

    Ok(archived)
}
