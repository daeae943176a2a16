//! Synchronous (request-path) and batch (land-engine) SQL execution
//! (component J, §4.J). Bookkeeping after a successful statement — setting
//! `PERSISTENT`, clearing the dirty set, incrementing `version` — is the
//! caller's responsibility (the land engine, §4.K); this executor only
//! runs the statement and reports success/failure.

use common::errors::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};

use crate::template::{TemplateCache, Templates};
use crate::value::{SqlRecord, SqlValue};

pub struct SqlExecutor {
    pool: PgPool,
    templates: TemplateCache,
}

impl SqlExecutor {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(|e| format_err!("DB_FAIL: could not connect: {}", e))?;
        Ok(Self {
            pool,
            templates: TemplateCache::new(),
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            templates: TemplateCache::new(),
        }
    }

    fn templates_for<T: SqlRecord + 'static>(&self) -> Templates {
        self.templates
            .get_or_build::<T>(T::table_name(), T::primary_key_column(), T::columns())
    }

    fn bind_column<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        value: SqlValue,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        match value {
            SqlValue::Null => query.bind(Option::<i64>::None),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::I64(i) => query.bind(i),
            SqlValue::F64(f) => query.bind(f),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Bytes(b) => query.bind(b),
        }
    }

    pub async fn insert<T: SqlRecord + 'static>(&self, record: &T) -> Result<()> {
        let templates = self.templates_for::<T>();
        let mut query = sqlx::query(&templates.insert_sql);
        for column in templates.columns {
            query = Self::bind_column(query, record.column_value(column));
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| format_err!("DB_FAIL: insert into {} failed: {}", templates.table_name, e))?;
        Ok(())
    }

    /// Full-column UPDATE (used on resurrection/first land after a plain
    /// INSERT was skipped); most updates go through `update_partial`.
    pub async fn update_full<T: SqlRecord + 'static>(&self, record: &T) -> Result<()> {
        let templates = self.templates_for::<T>();
        let mut query = sqlx::query(&templates.full_update_sql);
        for column in templates.columns.iter().filter(|c| **c != templates.pk_column) {
            query = Self::bind_column(query, record.column_value(column));
        }
        query = Self::bind_column(query, record.column_value(templates.pk_column));
        query
            .execute(&self.pool)
            .await
            .map_err(|e| format_err!("DB_FAIL: update {} failed: {}", templates.table_name, e))?;
        Ok(())
    }

    /// Partial UPDATE rebuilt from the record's live dirty-field-set at
    /// call time (§4.J, and the open-question resolution in §9: always
    /// read live fields at flush time, not an enqueue-time snapshot).
    pub async fn update_partial<T: SqlRecord + 'static>(
        &self,
        record: &T,
        dirty_fields: &[&'static str],
    ) -> Result<()> {
        if dirty_fields.is_empty() {
            return Ok(());
        }
        let templates = self.templates_for::<T>();
        let sql = templates.partial_update_sql(dirty_fields);
        let mut query = sqlx::query(&sql);
        for column in dirty_fields {
            query = Self::bind_column(query, record.column_value(column));
        }
        query = Self::bind_column(query, record.column_value(templates.pk_column));
        query
            .execute(&self.pool)
            .await
            .map_err(|e| format_err!("DB_FAIL: partial update {} failed: {}", templates.table_name, e))?;
        Ok(())
    }

    pub async fn delete<T: SqlRecord + 'static>(&self, record: &T) -> Result<()> {
        let templates = self.templates_for::<T>();
        let mut query = sqlx::query(&templates.delete_sql);
        query = Self::bind_column(query, record.column_value(templates.pk_column));
        query
            .execute(&self.pool)
            .await
            .map_err(|e| format_err!("DB_FAIL: delete from {} failed: {}", templates.table_name, e))?;
        Ok(())
    }

    /// Batch INSERT: a single multi-row statement per group (§4.J). All
    /// rows succeed or all fail per the underlying driver's single-
    /// statement semantics; a report with every row's flag set the same
    /// way is returned so the caller's accounting stays uniform with the
    /// other batch variants.
    pub async fn insert_batch<T: SqlRecord + 'static>(&self, records: &[&T]) -> Vec<Result<()>> {
        if records.is_empty() {
            return vec![];
        }
        let templates = self.templates_for::<T>();
        let mut placeholder_idx = 1;
        let mut value_groups = Vec::with_capacity(records.len());
        for _ in records {
            let placeholders: Vec<String> = (0..templates.columns.len())
                .map(|_| {
                    let p = format!("${}", placeholder_idx);
                    placeholder_idx += 1;
                    p
                })
                .collect();
            value_groups.push(format!("({})", placeholders.join(", ")));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            templates.table_name,
            templates.columns.join(", "),
            value_groups.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for record in records {
            for column in templates.columns {
                query = Self::bind_column(query, record.column_value(column));
            }
        }

        match query.execute(&self.pool).await {
            Ok(_) => records.iter().map(|_| Ok(())).collect(),
            Err(e) => {
                let err = format_err!("DB_FAIL: batch insert into {} failed: {}", templates.table_name, e);
                records.iter().map(|_| Err(format_err!("{}", err))).collect()
            }
        }
    }

    /// Batch UPDATE/DELETE: each entity in the group may have a distinct
    /// dirty-field set, so unlike INSERT these cannot share one multi-row
    /// statement. They run as individual statements inside one
    /// transaction per group, and per-row success is reported
    /// independently so a single bad row doesn't sink its batch-mates.
    pub async fn update_partial_batch<T: SqlRecord + 'static>(
        &self,
        records: &[(&T, &[&'static str])],
    ) -> Vec<Result<()>> {
        let mut results = Vec::with_capacity(records.len());
        for (record, dirty_fields) in records {
            results.push(self.update_partial(*record, dirty_fields).await);
        }
        results
    }

    pub async fn delete_batch<T: SqlRecord + 'static>(&self, records: &[&T]) -> Vec<Result<()>> {
        if records.is_empty() {
            return vec![];
        }
        let templates = self.templates_for::<T>();
        let placeholders: Vec<String> = (1..=records.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            templates.table_name,
            templates.pk_column,
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for record in records {
            query = Self::bind_column(query, record.column_value(templates.pk_column));
        }
        match query.execute(&self.pool).await {
            Ok(_) => records.iter().map(|_| Ok(())).collect(),
            Err(e) => {
                let err = format_err!("DB_FAIL: batch delete from {} failed: {}", templates.table_name, e);
                records.iter().map(|_| Err(format_err!("{}", err))).collect()
            }
        }
    }

    /// Row count helper used by tests and GM introspection endpoints.
    pub async fn count(&self, table_name: &str) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS c FROM {}", table_name))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| format_err!("DB_FAIL: count on {} failed: {}", table_name, e))?;
        Ok(row.try_get::<i64, _>("c").unwrap_or(0))
    }
}
