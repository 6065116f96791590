//! A `sqlx` implementation of the `tirian` record store.
//!
//! All namespaces share one `records` table keyed by `(namespace, key)`.
//! The primary key is the uniqueness constraint the identifier minter
//! depends on: a duplicate insert surfaces as [`Error::Conflict`]. Compile it
//! with the `postgres-storage` cargo feature.
#![allow(clippy::missing_errors_doc)]

use serde_json::Value;
use sqlx::PgPool;
use tracing::instrument;

use crate::{Error, RawRecord, RecordStore, Result, Table};

/// Maps `sqlx::Error` into this crate's `Error`.
///
/// Unique violations become [`Error::Conflict`].
fn to_store_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict,
        _ => Error::Store(e.to_string()),
    }
}

/// A `sqlx`-backed record store for PostgreSQL.
#[derive(Debug, Clone)]
pub struct SqlxRecordStore {
    pool: PgPool,
}

impl SqlxRecordStore {
    /// Creates a new `SqlxRecordStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the `records` table exists.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS records (
                    namespace TEXT NOT NULL,
                    key TEXT NOT NULL,
                    version BIGINT NOT NULL,
                    payload JSONB NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (namespace, key)
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlxRecordStore {
    #[instrument(skip(self, payload), fields(table = %table))]
    async fn insert(&self, table: Table, key: &str, payload: Value) -> Result<RawRecord> {
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        // A duplicate key aborts here; dropping `tx` rolls back.
        sqlx::query("INSERT INTO records (namespace, key, version, payload) VALUES ($1, $2, 1, $3)")
            .bind(table.as_str())
            .bind(key)
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(to_store_error)?;

        tx.commit().await.map_err(to_store_error)?;

        Ok(RawRecord {
            table,
            key: key.to_owned(),
            version: 1,
            payload,
        })
    }

    #[instrument(skip(self, payload), fields(table = %table))]
    async fn update(
        &self,
        table: Table,
        key: &str,
        expected_version: Option<i64>,
        payload: Value,
    ) -> Result<RawRecord> {
        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM records WHERE namespace = $1 AND key = $2 FOR UPDATE",
        )
        .bind(table.as_str())
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(to_store_error)?;

        let current = current.ok_or(Error::NotFound)?;
        if expected_version.is_some_and(|expected| expected != current) {
            return Err(Error::Conflict);
        }

        let version: i64 = sqlx::query_scalar(
            r#"
            UPDATE records
            SET version = version + 1, payload = $3, updated_at = NOW()
            WHERE namespace = $1 AND key = $2
            RETURNING version
            "#,
        )
        .bind(table.as_str())
        .bind(key)
        .bind(&payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(to_store_error)?;

        tx.commit().await.map_err(to_store_error)?;

        Ok(RawRecord {
            table,
            key: key.to_owned(),
            version,
            payload,
        })
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM records WHERE namespace = $1 AND key = $2")
            .bind(table.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn get(&self, table: Table, key: &str) -> Result<Option<RawRecord>> {
        let row: Option<(i64, Value)> =
            sqlx::query_as("SELECT version, payload FROM records WHERE namespace = $1 AND key = $2")
                .bind(table.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(to_store_error)?;

        Ok(row.map(|(version, payload)| RawRecord {
            table,
            key: key.to_owned(),
            version,
            payload,
        }))
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn list(&self, table: Table) -> Result<Vec<RawRecord>> {
        let rows: Vec<(String, i64, Value)> = sqlx::query_as(
            r#"SELECT key, version, payload FROM records WHERE namespace = $1 ORDER BY key COLLATE "C""#,
        )
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(rows
            .into_iter()
            .map(|(key, version, payload)| RawRecord {
                table,
                key,
                version,
                payload,
            })
            .collect())
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn latest_key_with_prefix(&self, table: Table, prefix: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            r#"
            SELECT key FROM records
            WHERE namespace = $1 AND starts_with(key, $2)
            ORDER BY key COLLATE "C" DESC
            LIMIT 1
            "#,
        )
        .bind(table.as_str())
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(to_store_error)
    }
}
