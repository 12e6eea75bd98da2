//! PostgreSQL persistence context.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row as _;
use tracing::{debug, info, warn};

use repokit_core::error::{AppError, ErrorKind};
use repokit_core::result::AppResult;
use repokit_core::traits::context::{Mutation, MutationKind, PersistenceContext, QuerySpec, Row};
use repokit_core::traits::entity::Relation;

use super::key_text;
use super::sql;
use super::tracker::ChangeTracker;

/// One unit of work over a PostgreSQL pool.
///
/// Reads run directly on the pool. Staged mutations are written inside a
/// single transaction by [`PersistenceContext::save_changes`].
#[derive(Debug)]
pub struct PgContext {
    pool: PgPool,
    staged: Mutex<Vec<Mutation>>,
    tracker: ChangeTracker,
}

impl PgContext {
    /// Create a context over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            staged: Mutex::new(Vec::new()),
            tracker: ChangeTracker::new(),
        }
    }

    /// The pool this context reads from and commits to.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn staged(&self) -> std::sync::MutexGuard<'_, Vec<Mutation>> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn restore(&self, mut mutations: Vec<Mutation>) {
        let mut staged = self.staged();
        mutations.append(&mut staged);
        *staged = mutations;
    }

    /// Write every mutation in one transaction. Returns the rows as stored
    /// and the number of rows the statements affected.
    async fn write_all(&self, staged: &[Mutation]) -> AppResult<(Vec<Row>, u64)> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Store, "Failed to begin transaction", e)
        })?;

        let mut written = Vec::with_capacity(staged.len());
        let mut affected = 0;
        for mutation in staged {
            let row = mutation.row()?;
            let statement = sql::mutation(mutation.kind, mutation.table, mutation.key_field, &row)?;
            let query = sqlx::query(&statement).bind(Value::Object(row.clone()));
            let write_failed = |e: sqlx::Error| {
                AppError::with_source(
                    ErrorKind::Store,
                    format!("Failed to write staged change to '{}'", mutation.table),
                    e,
                )
            };

            let stored = if mutation.kind == MutationKind::Remove {
                let result = query.execute(&mut *tx).await.map_err(write_failed)?;
                affected += result.rows_affected();
                (result.rows_affected() > 0).then(|| row.clone())
            } else {
                let returned = query.fetch_all(&mut *tx).await.map_err(write_failed)?;
                affected += returned.len() as u64;
                decode_rows(returned)?.into_iter().next()
            };

            let Some(stored) = stored else {
                let key = mutation
                    .key_field
                    .and_then(|f| row.get(f))
                    .and_then(key_text)
                    .unwrap_or_else(|| "NULL".to_string());
                return Err(AppError::store(format!(
                    "no row in '{}' with key {key}",
                    mutation.table
                )));
            };
            written.push(stored);
        }

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Store, "Failed to commit transaction", e)
        })?;
        Ok((written, affected))
    }
}

fn decode_rows(rows: Vec<PgRow>) -> AppResult<Vec<Row>> {
    rows.into_iter()
        .map(|row| {
            let value: Value = row.try_get(0).map_err(|e| {
                AppError::with_source(ErrorKind::Store, "Failed to decode row", e)
            })?;
            match value {
                Value::Object(map) => Ok(map),
                other => Err(AppError::new(
                    ErrorKind::Serialization,
                    format!("expected a JSON object row, got {other}"),
                )),
            }
        })
        .collect()
}

#[async_trait]
impl PersistenceContext for PgContext {
    async fn fetch(&self, query: &QuerySpec) -> AppResult<Vec<Row>> {
        let mut qb = sql::select(query)?;
        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Store,
                format!("Failed to query '{}'", query.table),
                e,
            )
        })?;
        debug!(table = query.table, rows = rows.len(), "Fetched rows from PostgreSQL");
        decode_rows(rows)
    }

    async fn count(&self, query: &QuerySpec) -> AppResult<u64> {
        let mut qb = sql::count(query)?;
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Store,
                    format!("Failed to count '{}'", query.table),
                    e,
                )
            })?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_related(&self, relation: &Relation, keys: &[Value]) -> AppResult<Vec<Row>> {
        let keys: Vec<String> = keys.iter().filter_map(key_text).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = sql::related(relation, keys)?;
        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Store,
                format!("Failed to load relation '{}'", relation.name),
                e,
            )
        })?;
        decode_rows(rows)
    }

    fn stage(&self, mutation: Mutation) {
        debug!(table = mutation.table, kind = ?mutation.kind, "Staged mutation");
        self.staged().push(mutation);
    }

    fn pending_changes(&self) -> usize {
        self.staged().len()
    }

    fn discard_changes(&self) -> usize {
        std::mem::take(&mut *self.staged()).len()
    }

    fn track(&self, table: &'static str, key: &Value, row: &Row) {
        self.tracker.track(table, key, row);
    }

    fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    fn tracked(&self, table: &str, key: &Value) -> Option<Row> {
        self.tracker.get(table, key)
    }

    async fn save_changes(&self) -> AppResult<u64> {
        let staged = std::mem::take(&mut *self.staged());
        if staged.is_empty() {
            return Ok(0);
        }

        let (written, affected) = match self.write_all(&staged).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, pending = staged.len(), "Commit rolled back");
                self.restore(staged);
                return Err(e);
            }
        };

        for (mutation, row) in staged.iter().zip(&written) {
            self.tracker
                .committed(mutation.kind, mutation.table, mutation.key_field, row);
            if let Err(e) = mutation.refresh(row) {
                warn!(table = mutation.table, error = %e, "Could not refresh staged entity");
            }
        }

        info!(affected, "Committed staged changes to PostgreSQL");
        Ok(affected)
    }
}
