//! Persistence-context contract.
//!
//! A persistence context is one unit of work against a backing store. It
//! executes query descriptions, stages mutations in memory, and commits
//! all staged mutations at once. Staged work that is never committed is
//! discarded with the context.
//!
//! Contexts exchange rows as JSON objects; repositories convert them to
//! and from entity types.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::result::AppResult;
use crate::traits::entity::{Entity, Relation};
use crate::types::filter::Filter;
use crate::types::sorting::SortField;

/// A stored row: field name to JSON value.
pub type Row = Map<String, Value>;

/// A resolved include path: the relation to load and the relations to
/// load beneath it.
#[derive(Debug, Clone)]
pub struct IncludeNode {
    /// Relation loaded at this level.
    pub relation: Relation,
    /// Includes applied to the related rows.
    pub children: Vec<IncludeNode>,
}

/// An executable description of a query against one table.
///
/// Contexts honour `filter`, `order`, `offset`, and `limit`. `includes`
/// are loaded by the caller through [`PersistenceContext::fetch_related`].
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Table to query.
    pub table: &'static str,
    /// Key field of the table, if the entity declares one.
    pub key_field: Option<&'static str>,
    /// Relations to eager-load.
    pub includes: Vec<IncludeNode>,
    /// Predicate rows must satisfy.
    pub filter: Option<Filter>,
    /// Output order. Empty means store-defined order.
    pub order: Vec<SortField>,
    /// Rows to skip.
    pub offset: Option<i64>,
    /// Maximum rows to return.
    pub limit: Option<i64>,
}

impl QuerySpec {
    /// A query over every row of `table`.
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            ..Self::default()
        }
    }

    /// Whether an offset or limit is set.
    pub fn is_windowed(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }
}

/// Kind of staged change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Insert a new row.
    Insert,
    /// Replace every column of an existing row.
    Update,
    /// Delete an existing row.
    Remove,
}

/// Deferred conversion of a staged entity into a row.
///
/// Entities are serialized when the context commits, so staging itself
/// never fails.
pub trait RowSource: Send + Sync {
    /// Serialize into a row.
    fn to_row(&self) -> AppResult<Row>;

    /// Take on the row as the store recorded it after a commit.
    fn refresh(&self, _stored: &Row) -> AppResult<()> {
        Ok(())
    }
}

/// An entity registered with a persistence context.
///
/// The context keeps a handle to the same entity, and a successful commit
/// writes store-generated values such as assigned keys back into it.
#[derive(Debug, Default)]
pub struct Staged<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Staged<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> Staged<T> {
    /// Wrap an entity for staging.
    pub fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entity)),
        }
    }

    /// A copy of the entity in its current state.
    pub fn get(&self) -> T {
        self.lock().clone()
    }

    /// Read the entity without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn entity_row<T: Entity>(entity: &T) -> AppResult<Row> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::error::AppError::new(
            crate::error::ErrorKind::Serialization,
            format!(
                "entity for table '{}' serialized to {other}, expected an object",
                T::TABLE
            ),
        )),
    }
}

impl<T: Entity> RowSource for Staged<T> {
    fn to_row(&self) -> AppResult<Row> {
        entity_row(&*self.lock())
    }

    fn refresh(&self, stored: &Row) -> AppResult<()> {
        let mut entity = self.lock();
        // relation fields are not stored, so keep whatever the caller loaded
        let mut merged = entity_row(&*entity)?;
        merged.extend(stored.iter().map(|(k, v)| (k.clone(), v.clone())));
        *entity = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }
}

/// A change waiting for the next commit.
#[derive(Clone)]
pub struct Mutation {
    /// What to do.
    pub kind: MutationKind,
    /// Table affected.
    pub table: &'static str,
    /// Key field used to address existing rows.
    pub key_field: Option<&'static str>,
    /// Names of relation fields that are not stored columns.
    pub relation_fields: Vec<&'static str>,
    /// The staged entity.
    pub source: Arc<dyn RowSource>,
}

impl Mutation {
    /// Stage `entity` for `kind`.
    pub fn of<T: Entity>(kind: MutationKind, entity: &Staged<T>) -> Self {
        Self {
            kind,
            table: T::TABLE,
            key_field: T::key_spec().map(|k| k.field()),
            relation_fields: T::relations().iter().map(|r| r.name).collect(),
            source: Arc::new(entity.clone()),
        }
    }

    /// Serialize the staged entity, dropping relation fields.
    pub fn row(&self) -> AppResult<Row> {
        let mut row = self.source.to_row()?;
        for field in &self.relation_fields {
            row.remove(*field);
        }
        Ok(row)
    }

    /// Hand the stored row back to the staged entity. Removals have
    /// nothing to report.
    pub fn refresh(&self, stored: &Row) -> AppResult<()> {
        if self.kind == MutationKind::Remove {
            return Ok(());
        }
        self.source.refresh(stored)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("key_field", &self.key_field)
            .finish_non_exhaustive()
    }
}

/// One unit of work against a backing store.
///
/// A context and every repository borrowed from it must be used by one
/// task at a time.
#[async_trait]
pub trait PersistenceContext: Send + Sync + fmt::Debug {
    /// Execute `query` and return the matching rows.
    async fn fetch(&self, query: &QuerySpec) -> AppResult<Vec<Row>>;

    /// Count rows matching `query`, ignoring its order and includes.
    async fn count(&self, query: &QuerySpec) -> AppResult<u64>;

    /// Fetch rows of `relation.table` whose `relation.foreign_field` is one
    /// of `keys`.
    async fn fetch_related(&self, relation: &Relation, keys: &[Value]) -> AppResult<Vec<Row>>;

    /// Stage a mutation for the next commit.
    fn stage(&self, mutation: Mutation);

    /// Number of staged mutations.
    fn pending_changes(&self) -> usize;

    /// Drop every staged mutation, returning how many were dropped.
    fn discard_changes(&self) -> usize;

    /// Record a snapshot of a row read with change tracking enabled.
    fn track(&self, table: &'static str, key: &Value, row: &Row);

    /// Number of tracked rows.
    fn tracked_count(&self) -> usize;

    /// Snapshot recorded for the row of `table` with the given key.
    fn tracked(&self, table: &str, key: &Value) -> Option<Row>;

    /// Persist every staged mutation atomically and return the number of
    /// affected rows.
    async fn save_changes(&self) -> AppResult<u64>;
}
