use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{RowData, RowId},
    retention::ExpiredQuery,
};

/// Statement-level parameters of one archive move: which columns to copy from
/// `source` into `destination`, keyed by `id_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    pub source: String,
    pub destination: String,
    pub id_column: String,
    /// Columns copied verbatim; excludes the identifier and `archived_at`.
    pub columns: Vec<String>,
    /// Ids per `INSERT ... SELECT` statement.
    pub insert_batch_size: usize,
}

/// Generic, table-agnostic access used by the retention engine.
///
/// Table and column names reaching these methods have been validated as plain
/// identifiers by the policy registry.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    /// Column names of `table` in definition order; empty if the table
    /// doesn't exist.
    async fn columns(&self, table: &str) -> DbResult<Vec<String>>;

    async fn table_exists(&self, table: &str) -> DbResult<bool>;

    /// Number of rows currently matching the expiration predicate.
    async fn count_expired(&self, query: &ExpiredQuery) -> DbResult<u64>;

    /// Up to `limit` expired ids in ascending key order, strictly after
    /// `after` when given.
    async fn expired_ids(
        &self,
        query: &ExpiredQuery,
        after: Option<&RowId>,
        limit: u64,
    ) -> DbResult<Vec<RowId>>;

    /// Load a single row; `None` if it no longer exists.
    async fn fetch_row(&self, table: &str, id_column: &str, id: &RowId)
    -> DbResult<Option<RowData>>;

    /// Delete the given rows in one transaction. Returns rows deleted.
    async fn delete_by_ids(&self, table: &str, id_column: &str, ids: &[RowId]) -> DbResult<u64>;

    /// Copy the given rows into the archive table and delete the originals,
    /// all in one transaction. Rolled back entirely on any error.
    /// Returns rows moved.
    async fn archive_chunk(&self, plan: &ArchivePlan, ids: &[RowId]) -> DbResult<u64>;

    /// Total rows in `table`.
    async fn count_rows(&self, table: &str) -> DbResult<u64>;
}
