//! In-memory persistence context.
//!
//! [`MemoryStore`] plays the role of the database: a set of named tables
//! of JSON rows shared by every context opened on it. [`MemoryContext`]
//! is one unit of work over a store. Commits apply all staged mutations to
//! a copy of the tables and publish the copy only when every mutation
//! succeeded.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use repokit_core::error::AppError;
use repokit_core::result::AppResult;
use repokit_core::traits::context::{Mutation, MutationKind, PersistenceContext, QuerySpec, Row};
use repokit_core::traits::entity::Relation;
use repokit_core::types::{Filter, FilterField, FilterOp, FilterValue, SortDirection, SortField};

use super::key_text;
use super::tracker::ChangeTracker;

type Tables = HashMap<String, Vec<Row>>;

/// Shared in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new unit of work on this store.
    pub fn open_context(self: &Arc<Self>) -> MemoryContext {
        MemoryContext::new(Arc::clone(self))
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().get(table).cloned().unwrap_or_default()
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map(Vec::len).unwrap_or(0)
    }

    /// Append rows to `table` directly, bypassing any unit of work.
    ///
    /// Intended for seeding fixtures; no key checks are made.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.lock().entry(table.to_string()).or_default().extend(rows);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One unit of work over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryContext {
    store: Arc<MemoryStore>,
    staged: Mutex<Vec<Mutation>>,
    tracker: ChangeTracker,
}

impl MemoryContext {
    /// Create a context over `store`.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            staged: Mutex::new(Vec::new()),
            tracker: ChangeTracker::new(),
        }
    }

    /// The store this context commits to.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn staged(&self) -> std::sync::MutexGuard<'_, Vec<Mutation>> {
        self.staged.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put mutations from a failed commit back ahead of anything staged
    /// since.
    fn restore(&self, mut mutations: Vec<Mutation>) {
        let mut staged = self.staged();
        mutations.append(&mut staged);
        *staged = mutations;
    }

    fn select(&self, query: &QuerySpec) -> Vec<Row> {
        let tables = self.store.lock();
        let mut rows: Vec<Row> = tables
            .get(query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.as_ref().is_none_or(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(tables);

        if !query.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        }

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl PersistenceContext for MemoryContext {
    async fn fetch(&self, query: &QuerySpec) -> AppResult<Vec<Row>> {
        let rows = self.select(query);
        debug!(table = query.table, rows = rows.len(), "Fetched rows from memory store");
        Ok(rows)
    }

    async fn count(&self, query: &QuerySpec) -> AppResult<u64> {
        Ok(self.select(query).len() as u64)
    }

    async fn fetch_related(&self, relation: &Relation, keys: &[Value]) -> AppResult<Vec<Row>> {
        let wanted: HashSet<String> = keys.iter().filter_map(key_text).collect();
        let tables = self.store.lock();
        Ok(tables
            .get(relation.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.get(relation.foreign_field)
                            .and_then(key_text)
                            .is_some_and(|k| wanted.contains(&k))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn stage(&self, mutation: Mutation) {
        debug!(table = mutation.table, kind = ?mutation.kind, "Staged mutation");
        self.staged().push(mutation);
    }

    fn pending_changes(&self) -> usize {
        self.staged().len()
    }

    fn discard_changes(&self) -> usize {
        let dropped = std::mem::take(&mut *self.staged());
        dropped.len()
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

        let mut tables = self.store.lock();
        let mut working = tables.clone();
        let outcome: AppResult<Vec<Row>> = staged
            .iter()
            .map(|mutation| apply(&mut working, mutation))
            .collect();
        let applied = match outcome {
            Ok(applied) => applied,
            Err(e) => {
                drop(tables);
                self.restore(staged);
                return Err(e);
            }
        };

        *tables = working;
        drop(tables);

        for (mutation, row) in staged.iter().zip(&applied) {
            self.tracker
                .committed(mutation.kind, mutation.table, mutation.key_field, row);
            if let Err(e) = mutation.refresh(row) {
                warn!(table = mutation.table, error = %e, "Could not refresh staged entity");
            }
        }

        let affected = applied.len() as u64;
        info!(affected, "Committed staged changes to memory store");
        Ok(affected)
    }
}

/// Apply one mutation to `tables`, returning the row as stored.
fn apply(tables: &mut Tables, mutation: &Mutation) -> AppResult<Row> {
    let mut row = mutation.row()?;
    let rows = tables.entry(mutation.table.to_string()).or_default();

    let Some(key_field) = mutation.key_field else {
        if mutation.kind == MutationKind::Insert {
            rows.push(row.clone());
            return Ok(row);
        }
        return Err(AppError::unsupported(format!(
            "entity type for table '{}' declares no key; updates and removals require one",
            mutation.table
        )));
    };

    if mutation.kind == MutationKind::Insert && needs_generated_key(row.get(key_field)) {
        row.insert(key_field.to_string(), Value::from(next_sequence(rows, key_field)));
    }
    let key = row.get(key_field).and_then(key_text);
    let existing = position(rows, key_field, key.as_deref());

    match (mutation.kind, existing) {
        (MutationKind::Insert, Some(_)) => Err(AppError::store(format!(
            "duplicate key value violates unique constraint on {}.{}",
            mutation.table, key_field
        ))),
        (MutationKind::Insert, None) => {
            rows.push(row.clone());
            Ok(row)
        }
        (MutationKind::Update, Some(index)) => {
            rows[index] = row.clone();
            Ok(row)
        }
        (MutationKind::Remove, Some(index)) => {
            rows.remove(index);
            Ok(row)
        }
        (_, None) => Err(AppError::store(format!(
            "no row in '{}' with {} = {}",
            mutation.table,
            key_field,
            key.as_deref().unwrap_or("NULL")
        ))),
    }
}

fn needs_generated_key(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(_) => false,
    }
}

fn next_sequence(rows: &[Row], key_field: &str) -> i64 {
    rows.iter()
        .filter_map(|r| r.get(key_field).and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
        + 1
}

fn position(rows: &[Row], key_field: &str, key: Option<&str>) -> Option<usize> {
    let key = key?;
    rows.iter()
        .position(|r| r.get(key_field).and_then(key_text).as_deref() == Some(key))
}

/// Evaluate `filter` against a row with SQL semantics: comparisons
/// involving null are unknown, and only rows that evaluate to true match.
pub(crate) fn matches(row: &Row, filter: &Filter) -> bool {
    evaluate(row, filter) == Some(true)
}

/// Three-valued evaluation; `None` is SQL's unknown.
fn evaluate(row: &Row, filter: &Filter) -> Option<bool> {
    match filter {
        Filter::Field(field) => field_matches(row.get(&field.field).unwrap_or(&Value::Null), field),
        Filter::And(children) => {
            let mut result = Some(true);
            for child in children {
                match evaluate(row, child) {
                    Some(false) => return Some(false),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Filter::Or(children) => {
            let mut result = Some(false);
            for child in children {
                match evaluate(row, child) {
                    Some(true) => return Some(true),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
        Filter::Not(inner) => evaluate(row, inner).map(|b| !b),
    }
}

fn field_matches(actual: &Value, field: &FilterField) -> Option<bool> {
    match field.op {
        FilterOp::IsNull => Some(actual.is_null()),
        FilterOp::IsNotNull => Some(!actual.is_null()),
        FilterOp::In if matches!(&field.value, FilterValue::List(items) if items.is_empty()) => {
            Some(false)
        }
        _ if actual.is_null() => None,
        FilterOp::In => match &field.value {
            FilterValue::List(items) => {
                if items
                    .iter()
                    .any(|item| compare_value(actual, item) == Some(Ordering::Equal))
                {
                    Some(true)
                } else if items.iter().any(|item| matches!(item, FilterValue::Null)) {
                    None
                } else {
                    Some(false)
                }
            }
            _ => Some(false),
        },
        FilterOp::Like | FilterOp::ILike => match (actual, &field.value) {
            (_, FilterValue::Null) => None,
            (Value::String(text), FilterValue::String(pattern)) => {
                Some(like_matches(text, pattern, field.op == FilterOp::ILike))
            }
            _ => Some(false),
        },
        op => {
            if matches!(field.value, FilterValue::Null) {
                return None;
            }
            Some(compare_value(actual, &field.value).is_some_and(|ord| match op {
                FilterOp::Eq => ord == Ordering::Equal,
                FilterOp::Ne => ord != Ordering::Equal,
                FilterOp::Gt => ord == Ordering::Greater,
                FilterOp::Gte => ord != Ordering::Less,
                FilterOp::Lt => ord == Ordering::Less,
                FilterOp::Lte => ord != Ordering::Greater,
                _ => false,
            }))
        }
    }
}

/// Order a stored value relative to a filter value, `None` when they are
/// not comparable.
fn compare_value(actual: &Value, expected: &FilterValue) -> Option<Ordering> {
    match (actual, expected) {
        (Value::Null, _) | (_, FilterValue::Null) => None,
        (Value::Number(n), FilterValue::Integer(i)) => match n.as_i64() {
            Some(v) => Some(v.cmp(i)),
            None => n.as_f64()?.partial_cmp(&(*i as f64)),
        },
        (Value::Number(n), FilterValue::Float(f)) => n.as_f64()?.partial_cmp(f),
        (Value::String(s), FilterValue::String(e)) => Some(s.as_str().cmp(e.as_str())),
        (Value::String(s), FilterValue::Uuid(u)) => Some(Uuid::parse_str(s).ok()?.cmp(u)),
        (Value::String(s), FilterValue::Timestamp(t)) => Some(parse_timestamp(s)?.cmp(t)),
        (Value::Bool(b), FilterValue::Boolean(e)) => Some(b.cmp(e)),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Order two rows by a sequence of sort fields. Nulls sort last when
/// ascending and first when descending, as PostgreSQL does.
fn compare_rows(a: &Row, b: &Row, order: &[SortField]) -> Ordering {
    for field in order {
        let left = a.get(&field.field).unwrap_or(&Value::Null);
        let right = b.get(&field.field).unwrap_or(&Value::Null);
        let ord = compare_json(left, right);
        let ord = match field.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// SQL `LIKE` matching: `%` is any run, `_` any single character, and a
/// backslash escapes the next character.
fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let flags = if case_insensitive { "(?is)" } else { "(?s)" };
    Regex::new(&format!("{flags}{}", like_to_regex(pattern))).is_ok_and(|re| re.is_match(text))
}

/// Translate a `LIKE` pattern into an anchored regular expression.
fn like_to_regex(pattern: &str) -> String {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');

    let mut buf = [0u8; 4];
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                expr.push_str(&regex::escape(literal.encode_utf8(&mut buf)));
            }
            c => expr.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }

    expr.push('$');
    expr
}
