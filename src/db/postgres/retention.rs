use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};

use super::common::{
    bind_id, bind_id_array, bind_value, decode_row, decode_row_id, numbered_placeholders,
};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ArchivePlan, RetentionStore},
    },
    models::{RowData, RowId},
    retention::{ExpiredQuery, quote_ident},
};

/// Retention store on a primary pool and an optional replica.
///
/// Schema checks and everything that selects rows for removal go to the
/// primary; only `count_rows` may read from the replica.
pub struct PostgresRetentionStore {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRetentionStore {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

async fn delete_ids(
    conn: &mut PgConnection,
    table: &str,
    id_column: &str,
    ids: &[RowId],
) -> DbResult<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ANY($1)",
        quote_ident(table),
        quote_ident(id_column)
    );
    let result = bind_id_array(sqlx::query(&sql), ids)?
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn archive_ids(conn: &mut PgConnection, plan: &ArchivePlan, ids: &[RowId]) -> DbResult<u64> {
    let mut insert_columns: Vec<String> = plan.columns.iter().map(|c| quote_ident(c)).collect();
    let mut select_columns = insert_columns.clone();
    insert_columns.push(quote_ident("archived_at"));
    select_columns.push("CURRENT_TIMESTAMP".to_string());

    let sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = ANY($1)",
        quote_ident(&plan.destination),
        insert_columns.join(", "),
        select_columns.join(", "),
        quote_ident(&plan.source),
        quote_ident(&plan.id_column),
    );

    let mut inserted = 0;
    for batch in ids.chunks(plan.insert_batch_size.max(1)) {
        inserted += bind_id_array(sqlx::query(&sql), batch)?
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }

    let deleted = delete_ids(conn, &plan.source, &plan.id_column, ids).await?;
    if inserted != deleted {
        return Err(DbError::Internal(format!(
            "archived {} rows from {} but deleted {}",
            inserted, plan.source, deleted
        )));
    }
    Ok(deleted)
}

#[async_trait]
impl RetentionStore for PostgresRetentionStore {
    async fn columns(&self, table: &str) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS name
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.write_pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DbError::from))
            .collect()
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.write_pool)
        .await?;
        Ok(exists)
    }

    async fn count_expired(&self, query: &ExpiredQuery) -> DbResult<u64> {
        let filter = query.to_sql();
        let (where_clause, _) = numbered_placeholders(&filter.where_clause, 1);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(&query.table),
            where_clause
        );
        let mut q = sqlx::query(&sql);
        for value in &filter.bindings {
            q = bind_value(q, value);
        }
        let count: i64 = q.fetch_one(&self.write_pool).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn expired_ids(
        &self,
        query: &ExpiredQuery,
        after: Option<&RowId>,
        limit: u64,
    ) -> DbResult<Vec<RowId>> {
        let filter = query.to_sql();
        let (where_clause, mut next) = numbered_placeholders(&filter.where_clause, 1);
        let id = quote_ident(&query.id_column);
        let cursor = if after.is_some() {
            let clause = format!(" AND {} > ${}", id, next);
            next += 1;
            clause
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT {id} FROM {} WHERE {}{cursor} ORDER BY {id} ASC LIMIT ${next}",
            quote_ident(&query.table),
            where_clause
        );

        let mut q = sqlx::query(&sql);
        for value in &filter.bindings {
            q = bind_value(q, value);
        }
        if let Some(after) = after {
            q = bind_id(q, after);
        }
        let rows = q
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.write_pool)
            .await?;

        rows.iter().map(|row| decode_row_id(row, 0)).collect()
    }

    async fn fetch_row(
        &self,
        table: &str,
        id_column: &str,
        id: &RowId,
    ) -> DbResult<Option<RowData>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            quote_ident(table),
            quote_ident(id_column)
        );
        let row = bind_id(sqlx::query(&sql), id)
            .fetch_optional(&self.write_pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn delete_by_ids(&self, table: &str, id_column: &str, ids: &[RowId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.write_pool.begin().await?;
        let deleted = delete_ids(&mut tx, table, id_column, ids).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn archive_chunk(&self, plan: &ArchivePlan, ids: &[RowId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.write_pool.begin().await?;
        match archive_ids(&mut tx, plan, ids).await {
            Ok(moved) => {
                tx.commit().await?;
                Ok(moved)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        table = %plan.source,
                        error = %rollback_err,
                        "Failed to roll back archive chunk"
                    );
                }
                Err(e)
            }
        }
    }

    async fn count_rows(&self, table: &str) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.read_pool).await?;
        Ok(count.max(0) as u64)
    }
}
