use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::common::{
    bind_id, bind_value, decode_row, decode_row_id, older_than, placeholders,
};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ArchivePlan, RetentionStore},
    },
    models::{RowData, RowId},
    retention::{ExpiredQuery, quote_ident},
};

/// Ids per `IN (...)` list, well under SQLite's bound-parameter limit.
const MAX_IDS_PER_STATEMENT: usize = 500;

pub struct SqliteRetentionStore {
    pool: SqlitePool,
}

impl SqliteRetentionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn delete_ids(
    conn: &mut SqliteConnection,
    table: &str,
    id_column: &str,
    ids: &[RowId],
) -> DbResult<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(table),
            quote_ident(id_column),
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = bind_id(query, id);
        }
        deleted += query.execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

async fn archive_ids(
    conn: &mut SqliteConnection,
    plan: &ArchivePlan,
    ids: &[RowId],
) -> DbResult<u64> {
    let column_list = plan
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_columns = if column_list.is_empty() {
        quote_ident("archived_at")
    } else {
        format!("{}, {}", column_list, quote_ident("archived_at"))
    };
    let select_columns = if column_list.is_empty() {
        "CURRENT_TIMESTAMP".to_string()
    } else {
        format!("{}, CURRENT_TIMESTAMP", column_list)
    };

    let mut inserted = 0;
    for batch in ids.chunks(plan.insert_batch_size.max(1)) {
        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} IN ({})",
            quote_ident(&plan.destination),
            insert_columns,
            select_columns,
            quote_ident(&plan.source),
            quote_ident(&plan.id_column),
            placeholders(batch.len())
        );
        let mut query = sqlx::query(&sql);
        for id in batch {
            query = bind_id(query, id);
        }
        inserted += query.execute(&mut *conn).await?.rows_affected();
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
impl RetentionStore for SqliteRetentionStore {
    async fn columns(&self, table: &str) -> DbResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DbError::from))
            .collect()
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count_expired(&self, query: &ExpiredQuery) -> DbResult<u64> {
        let filter = query.to_sql_with(older_than);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(&query.table),
            filter.where_clause
        );
        let mut q = sqlx::query(&sql);
        for value in &filter.bindings {
            q = bind_value(q, value);
        }
        let count: i64 = q.fetch_one(&self.pool).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn expired_ids(
        &self,
        query: &ExpiredQuery,
        after: Option<&RowId>,
        limit: u64,
    ) -> DbResult<Vec<RowId>> {
        let filter = query.to_sql_with(older_than);
        let id = quote_ident(&query.id_column);
        let cursor = if after.is_some() {
            format!(" AND {} > ?", id)
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT {id} FROM {} WHERE {}{cursor} ORDER BY {id} ASC LIMIT ?",
            quote_ident(&query.table),
            filter.where_clause
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
            .fetch_all(&self.pool)
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
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(id_column)
        );
        let row = bind_id(sqlx::query(&sql), id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn delete_by_ids(&self, table: &str, id_column: &str, ids: &[RowId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let deleted = delete_ids(&mut tx, table, id_column, ids).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn archive_chunk(&self, plan: &ArchivePlan, ids: &[RowId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
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
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::{db::tests::harness::create_sqlite_pool, models::RowFilter};

    async fn setup() -> (SqlitePool, SqliteRetentionStore) {
        let pool = create_sqlite_pool().await;
        sqlx::query(
            r#"
            CREATE TABLE events (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB,
                score REAL
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create events table");
        (pool.clone(), SqliteRetentionStore::new(pool))
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    async fn insert(pool: &SqlitePool, id: i64, age_days: i64, kind: &str) {
        sqlx::query("INSERT INTO events (id, created_at, kind, payload, score) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(now() - Duration::days(age_days))
            .bind(kind)
            .bind(vec![0xde_u8, 0xad])
            .bind(0.5_f64)
            .execute(pool)
            .await
            .unwrap();
    }

    fn query(filter: Option<RowFilter>) -> ExpiredQuery {
        ExpiredQuery {
            table: "events".to_string(),
            id_column: "id".to_string(),
            column: "created_at".to_string(),
            cutoff: now() - Duration::days(30),
            filter,
        }
    }

    #[tokio::test]
    async fn test_columns_and_table_exists() {
        let (_pool, store) = setup().await;
        assert_eq!(
            store.columns("events").await.unwrap(),
            vec!["id", "created_at", "kind", "payload", "score"]
        );
        assert!(store.columns("nope").await.unwrap().is_empty());
        assert!(store.table_exists("events").await.unwrap());
        assert!(!store.table_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_ids_keyset_pages() {
        let (pool, store) = setup().await;
        for id in 1..=5 {
            insert(&pool, id, 40, "a").await;
        }
        insert(&pool, 6, 10, "a").await;

        assert_eq!(store.count_expired(&query(None)).await.unwrap(), 5);

        let first = store.expired_ids(&query(None), None, 2).await.unwrap();
        assert_eq!(first, vec![RowId::Integer(1), RowId::Integer(2)]);
        let next = store
            .expired_ids(&query(None), first.last(), 10)
            .await
            .unwrap();
        assert_eq!(
            next,
            vec![RowId::Integer(3), RowId::Integer(4), RowId::Integer(5)]
        );
    }

    #[tokio::test]
    async fn test_filter_narrows_expired_set() {
        let (pool, store) = setup().await;
        insert(&pool, 1, 40, "keep").await;
        insert(&pool, 2, 40, "drop").await;
        insert(&pool, 3, 40, "drop").await;

        let q = query(Some(RowFilter::eq("kind", "drop")));
        assert_eq!(store.count_expired(&q).await.unwrap(), 2);
        assert_eq!(
            store.expired_ids(&q, None, 10).await.unwrap(),
            vec![RowId::Integer(2), RowId::Integer(3)]
        );
    }

    #[tokio::test]
    async fn test_age_compares_instants_across_text_formats() {
        let (pool, store) = setup().await;
        let rows = [
            (1, "2025-06-01 11:30:00"),
            (2, "2025-06-01 10:59:59"),
            (3, "2025-06-01T12:30:00+02:00"),
            (4, "2025-06-01T10:30:00-02:00"),
            (5, "2025-06-01T10:59:59.999999Z"),
            (6, "2025-06-01T11:00:00.000001+00:00"),
            (7, "2025-06-01 11:00:00"),
            (8, "2025-06-01T11:00:00.5"),
            (9, "2025-05-31"),
            (10, "not a timestamp"),
        ];
        for (id, created_at) in rows {
            sqlx::query("INSERT INTO events (id, created_at, kind) VALUES (?, ?, 'a')")
                .bind(id)
                .bind(created_at)
                .execute(&pool)
                .await
                .unwrap();
        }
        let q = ExpiredQuery {
            cutoff: Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
            ..query(None)
        };

        assert_eq!(store.count_expired(&q).await.unwrap(), 4);
        assert_eq!(
            store.expired_ids(&q, None, 100).await.unwrap(),
            vec![
                RowId::Integer(2),
                RowId::Integer(3),
                RowId::Integer(5),
                RowId::Integer(9),
            ]
        );
    }

    #[tokio::test]
    async fn test_age_boundary_keeps_microseconds() {
        let (pool, store) = setup().await;
        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap();
        sqlx::query("INSERT INTO events (id, created_at, kind) VALUES (1, ?, 'a')")
            .bind(cutoff)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO events (id, created_at, kind) VALUES (2, ?, 'a')")
            .bind(cutoff + Duration::microseconds(1))
            .execute(&pool)
            .await
            .unwrap();

        let at = |cutoff| ExpiredQuery {
            cutoff,
            ..query(None)
        };
        assert_eq!(store.count_expired(&at(cutoff)).await.unwrap(), 0);
        assert_eq!(
            store
                .expired_ids(&at(cutoff + Duration::microseconds(1)), None, 10)
                .await
                .unwrap(),
            vec![RowId::Integer(1)]
        );
        assert_eq!(
            store
                .count_expired(&at(cutoff + Duration::microseconds(2)))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_fetch_row_decodes_storage_classes() {
        let (pool, store) = setup().await;
        insert(&pool, 7, 40, "a").await;

        let row = store
            .fetch_row("events", "id", &RowId::Integer(7))
            .await
            .unwrap()
            .expect("row exists");
        assert_eq!(row["id"], serde_json::json!(7));
        assert_eq!(row["kind"], serde_json::json!("a"));
        assert_eq!(row["payload"], serde_json::json!("dead"));
        assert_eq!(row["score"], serde_json::json!(0.5));

        assert!(
            store
                .fetch_row("events", "id", &RowId::Integer(8))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_by_ids_spans_statement_chunks() {
        let (pool, store) = setup().await;
        for id in 1..=1200 {
            insert(&pool, id, 40, "a").await;
        }
        let ids: Vec<RowId> = (1..=1100).map(RowId::Integer).collect();

        assert_eq!(store.delete_by_ids("events", "id", &ids).await.unwrap(), 1100);
        assert_eq!(store.count_rows("events").await.unwrap(), 100);
        assert_eq!(store.delete_by_ids("events", "id", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_archive_chunk_moves_rows() {
        let (pool, store) = setup().await;
        sqlx::query(
            "CREATE TABLE events_archive (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB,
                score REAL,
                archived_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        for id in 1..=3 {
            insert(&pool, id, 40, "a").await;
        }
        let plan = ArchivePlan {
            source: "events".to_string(),
            destination: "events_archive".to_string(),
            id_column: "id".to_string(),
            columns: vec![
                "created_at".to_string(),
                "kind".to_string(),
                "payload".to_string(),
                "score".to_string(),
            ],
            insert_batch_size: 2,
        };

        let moved = store
            .archive_chunk(&plan, &[RowId::Integer(1), RowId::Integer(2), RowId::Integer(3)])
            .await
            .unwrap();
        assert_eq!(moved, 3);
        assert_eq!(store.count_rows("events").await.unwrap(), 0);
        assert_eq!(store.count_rows("events_archive").await.unwrap(), 3);

        let archived_at: Option<String> =
            sqlx::query_scalar("SELECT archived_at FROM events_archive LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(archived_at.is_some());
    }
}
