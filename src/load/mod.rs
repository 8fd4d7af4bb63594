//! Idempotent, transactional upserts into the warehouse.
//!
//! One call to [`Loader::upsert`] is one transaction. Rows are matched on
//! their natural key: absent rows are inserted, rows whose value columns
//! differ are updated, identical rows are skipped. Any failure rolls the whole
//! batch back and reports every key of the batch as unconfirmed.

pub mod schema;

use serde::Serialize;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool, Row};
use tracing::{debug, error, info};

use crate::error::LoadError;
use crate::rows::{ARRIVALS_TABLE, CanonicalRow, ROUTES_TABLE, SqlValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inserted,
    Updated,
    Skipped,
}

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

fn bind<'q>(query: AnyQuery<'q>, value: &SqlValue) -> AnyQuery<'q> {
    match value {
        SqlValue::Text(text) => query.bind(text.clone()),
        SqlValue::Int(n) => query.bind(*n),
    }
}

fn stored_matches(row: &AnyRow, index: usize, value: &SqlValue) -> Result<bool, sqlx::Error> {
    Ok(match value {
        SqlValue::Text(text) => row.try_get::<Option<String>, _>(index)? == *text,
        SqlValue::Int(n) => row.try_get::<i64, _>(index)? == *n,
    })
}

fn placeholders(columns: &[(&str, SqlValue)], offset: usize, sep: &str) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{col} = ${}", offset + i + 1))
        .collect::<Vec<_>>()
        .join(sep)
}

async fn upsert_row(conn: &mut AnyConnection, row: &CanonicalRow) -> Result<Outcome, sqlx::Error> {
    let table = row.table();
    let keys = row.key_columns();
    let values = row.value_columns();

    let select = format!(
        "SELECT {} FROM {table} WHERE {}",
        values.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", "),
        placeholders(&keys, 0, " AND ")
    );
    let mut query = sqlx::query(&select);
    for (_, v) in &keys {
        query = bind(query, v);
    }

    match query.fetch_optional(&mut *conn).await? {
        None => {
            let columns: Vec<&str> = keys.iter().chain(&values).map(|(c, _)| *c).collect();
            let params: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
            let insert = format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                params.join(", ")
            );
            let mut query = sqlx::query(&insert);
            for (_, v) in keys.iter().chain(&values) {
                query = bind(query, v);
            }
            query.execute(&mut *conn).await?;
            Ok(Outcome::Inserted)
        }
        Some(existing) => {
            let mut unchanged = true;
            for (i, (_, v)) in values.iter().enumerate() {
                if !stored_matches(&existing, i, v)? {
                    unchanged = false;
                    break;
                }
            }
            if unchanged {
                return Ok(Outcome::Skipped);
            }

            let update = format!(
                "UPDATE {table} SET {} WHERE {}",
                placeholders(&values, 0, ", "),
                placeholders(&keys, values.len(), " AND ")
            );
            let mut query = sqlx::query(&update);
            for (_, v) in values.iter().chain(&keys) {
                query = bind(query, v);
            }
            query.execute(&mut *conn).await?;
            Ok(Outcome::Updated)
        }
    }
}

/// Single shared warehouse handle for a run.
pub struct Loader {
    pool: AnyPool,
}

impl Loader {
    /// Opens the warehouse at `url` (`postgres://…` or `sqlite:…`).
    ///
    /// The pool holds exactly one long-lived connection: batches are
    /// serialized through it.
    pub async fn connect(url: &str) -> Result<Self, LoadError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(LoadError::Connect)?;
        Ok(Self { pool })
    }

    /// Creates the warehouse tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), LoadError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(LoadError::Connect)?;
        }
        debug!("Warehouse schema ensured");
        Ok(())
    }

    /// Upserts `rows` in a single transaction.
    ///
    /// # Errors
    ///
    /// [`LoadError::LoadFailure`] with every key of the batch when anything
    /// fails; nothing from the batch is committed in that case, and retrying
    /// the same batch is safe.
    #[tracing::instrument(skip_all, fields(rows = rows.len()))]
    pub async fn upsert(&self, rows: &[CanonicalRow]) -> Result<UpsertCounts, LoadError> {
        if rows.is_empty() {
            return Ok(UpsertCounts::default());
        }

        match self.upsert_batch(rows).await {
            Ok(counts) => {
                info!(
                    inserted = counts.inserted,
                    updated = counts.updated,
                    skipped = counts.skipped,
                    "Batch committed"
                );
                Ok(counts)
            }
            Err(source) => {
                error!(error = %source, rows = rows.len(), "Batch rolled back");
                Err(LoadError::LoadFailure {
                    pending_keys: rows.iter().map(CanonicalRow::natural_key).collect(),
                    source,
                })
            }
        }
    }

    async fn upsert_batch(&self, rows: &[CanonicalRow]) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut counts = UpsertCounts::default();

        for row in rows {
            match upsert_row(&mut tx, row).await? {
                Outcome::Inserted => counts.inserted += 1,
                Outcome::Updated => counts.updated += 1,
                Outcome::Skipped => counts.skipped += 1,
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Number of rows currently stored in `table`.
    pub async fn count(&self, table: &str) -> Result<i64, LoadError> {
        let table = match table {
            ARRIVALS_TABLE => ARRIVALS_TABLE,
            ROUTES_TABLE => ROUTES_TABLE,
            other => return Err(LoadError::UnknownTable(other.to_string())),
        };
        let row = sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(LoadError::Connect)?;
        row.try_get::<i64, _>(0).map_err(LoadError::Connect)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}
