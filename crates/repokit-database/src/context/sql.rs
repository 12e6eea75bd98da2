//! PostgreSQL statement builders.
//!
//! Reads select each row as `to_jsonb(t)`, so every table maps onto the
//! same JSON row shape the repositories deserialize from. Writes go
//! through `jsonb_populate_record`, which lets PostgreSQL coerce JSON
//! values into the column types.

use sqlx::{Postgres, QueryBuilder};

use repokit_core::error::AppError;
use repokit_core::result::AppResult;
use repokit_core::traits::context::{MutationKind, QuerySpec, Row};
use repokit_core::traits::entity::Relation;
use repokit_core::types::{Filter, FilterField, FilterOp, FilterValue, validate_identifier};

/// Quote a validated identifier.
pub fn quote(name: &str) -> AppResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// `SELECT to_jsonb(t) ...` for a query, including order and window.
pub fn select(query: &QuerySpec) -> AppResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new("SELECT to_jsonb(t) AS row FROM ");
    qb.push(quote(query.table)?).push(" AS t");
    push_where(&mut qb, query.filter.as_ref())?;

    if !query.order.is_empty() {
        qb.push(" ORDER BY ");
        for (i, field) in query.order.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push("t.")
                .push(quote(&field.field)?)
                .push(" ")
                .push(field.direction.as_sql());
        }
    }

    push_window(&mut qb, query);
    Ok(qb)
}

/// `SELECT COUNT(*)` over the filtered rows, honouring any window.
pub fn count(query: &QuerySpec) -> AppResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
    if query.is_windowed() {
        qb.push("(SELECT 1 FROM ").push(quote(query.table)?).push(" AS t");
        push_where(&mut qb, query.filter.as_ref())?;
        push_window(&mut qb, query);
        qb.push(") AS counted");
    } else {
        qb.push(quote(query.table)?).push(" AS t");
        push_where(&mut qb, query.filter.as_ref())?;
    }
    Ok(qb)
}

/// Rows of the relation's table whose foreign field is one of `keys`.
///
/// Keys are compared as text so one statement serves every key type.
pub fn related(relation: &Relation, keys: Vec<String>) -> AppResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new("SELECT to_jsonb(t) AS row FROM ");
    qb.push(quote(relation.table)?)
        .push(" AS t WHERE t.")
        .push(quote(relation.foreign_field)?)
        .push("::text = ANY(")
        .push_bind(keys)
        .push(")");
    Ok(qb)
}

/// Statement text for a staged mutation. The row is bound as `$1`.
///
/// Inserts omit a null or zero key so the column default applies. Inserts
/// and updates return the stored row as `to_jsonb(t)`.
pub fn mutation(
    kind: MutationKind,
    table: &str,
    key_field: Option<&str>,
    row: &Row,
) -> AppResult<String> {
    let table = quote(table)?;
    let record = format!("jsonb_populate_record(NULL::{table}, $1)");

    if kind == MutationKind::Insert {
        let columns = quoted_columns(row, |name, value| {
            Some(name) != key_field || !is_unset_key(value)
        })?;
        return Ok(format!(
            "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM {record}{RETURNING_ROW}"
        ));
    }

    let key_field = key_field.ok_or_else(|| {
        AppError::unsupported(format!(
            "entity type for table {table} declares no key; updates and removals require one"
        ))
    })?;
    let key = quote(key_field)?;
    let key_match = format!("t.{key} = (SELECT {key} FROM {record})");

    Ok(match kind {
        MutationKind::Update => {
            let columns = quoted_columns(row, |name, _| name != key_field)?;
            if columns.is_empty() {
                format!("UPDATE {table} AS t SET {key} = t.{key} WHERE {key_match}{RETURNING_ROW}")
            } else {
                format!(
                    "UPDATE {table} AS t SET ({columns}) = (SELECT {columns} FROM {record}) \
                     WHERE {key_match}{RETURNING_ROW}"
                )
            }
        }
        _ => format!("DELETE FROM {table} AS t WHERE {key_match}"),
    })
}

const RETURNING_ROW: &str = " RETURNING to_jsonb(t) AS row";

fn quoted_columns(
    row: &Row,
    keep: impl Fn(&str, &serde_json::Value) -> bool,
) -> AppResult<String> {
    let mut columns = Vec::with_capacity(row.len());
    for (name, value) in row {
        if keep(name, value) {
            columns.push(quote(name)?);
        }
    }
    Ok(columns.join(", "))
}

fn is_unset_key(value: &serde_json::Value) -> bool {
    value.is_null() || value.as_i64() == Some(0)
}

fn push_window(qb: &mut QueryBuilder<'static, Postgres>, query: &QuerySpec) {
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if let Some(offset) = query.offset {
        qb.push(" OFFSET ").push_bind(offset);
    }
}

fn push_where(qb: &mut QueryBuilder<'static, Postgres>, filter: Option<&Filter>) -> AppResult<()> {
    if let Some(filter) = filter {
        qb.push(" WHERE ");
        push_filter(qb, filter)?;
    }
    Ok(())
}

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) -> AppResult<()> {
    match filter {
        Filter::Field(field) => push_condition(qb, field)?,
        Filter::And(children) => push_group(qb, children, " AND ", "TRUE")?,
        Filter::Or(children) => push_group(qb, children, " OR ", "FALSE")?,
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, inner)?;
            qb.push(")");
        }
    }
    Ok(())
}

fn push_group(
    qb: &mut QueryBuilder<'static, Postgres>,
    children: &[Filter],
    joiner: &str,
    empty: &str,
) -> AppResult<()> {
    if children.is_empty() {
        qb.push(empty);
        return Ok(());
    }
    qb.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            qb.push(joiner);
        }
        push_filter(qb, child)?;
    }
    qb.push(")");
    Ok(())
}

fn push_condition(qb: &mut QueryBuilder<'static, Postgres>, field: &FilterField) -> AppResult<()> {
    field.validate()?;
    let column = format!("t.{}", quote(&field.field)?);

    match (field.op, &field.value) {
        (FilterOp::In, FilterValue::List(items)) if items.is_empty() => {
            qb.push("FALSE");
            return Ok(());
        }
        _ => {
            qb.push(column);
        }
    }

    match (field.op, &field.value) {
        (FilterOp::IsNull | FilterOp::IsNotNull, _) => {
            qb.push(" ").push(field.op.as_sql());
        }
        (FilterOp::In, FilterValue::List(items)) => {
            qb.push(" IN (");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(qb, item)?;
            }
            qb.push(")");
        }
        (op, value) => {
            qb.push(" ").push(op.as_sql()).push(" ");
            push_value(qb, value)?;
        }
    }
    Ok(())
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &FilterValue) -> AppResult<()> {
    match value {
        FilterValue::String(s) => {
            qb.push_bind(s.clone());
        }
        FilterValue::Integer(i) => {
            qb.push_bind(*i);
        }
        FilterValue::Float(f) => {
            qb.push_bind(*f);
        }
        FilterValue::Boolean(b) => {
            qb.push_bind(*b);
        }
        FilterValue::Uuid(u) => {
            qb.push_bind(*u);
        }
        FilterValue::Timestamp(t) => {
            qb.push_bind(*t);
        }
        FilterValue::Null => {
            qb.push("NULL");
        }
        FilterValue::List(_) => {
            return Err(AppError::invalid_argument(
                "list values are only valid with IN",
            ));
        }
    }
    Ok(())
}
