//! Filter types for dynamic query building.
//!
//! A [`Filter`] is the predicate handed to a repository. Callers build it
//! from [`FilterField`] conditions and combine them with [`Filter::and`],
//! [`Filter::or`], and [`Filter::not`]; each persistence context
//! translates the tree into its native query form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::ident::validate_identifier;

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// SQL `LIKE` pattern match.
    Like,
    /// SQL `ILIKE` case-insensitive pattern match.
    ILike,
    /// SQL `IN` list membership.
    In,
    /// SQL `IS NULL` check.
    IsNull,
    /// SQL `IS NOT NULL` check.
    IsNotNull,
}

impl FilterOp {
    /// Return the SQL operator for binary comparisons.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

/// A dynamic filter value that can represent various SQL types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Boolean(bool),
    /// A UUID value.
    Uuid(Uuid),
    /// A UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// A list of values (for `IN` operator).
    List(Vec<FilterValue>),
    /// Null / no value (for `IS NULL`, `IS NOT NULL`).
    Null,
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A single filter condition on a named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    /// The column or field name to filter on.
    pub field: String,
    /// The comparison operator.
    pub op: FilterOp,
    /// The value to compare against.
    pub value: FilterValue,
}

impl FilterField {
    /// Create a new filter field.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Shorthand for an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Shorthand for a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    /// Shorthand for a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    /// Shorthand for a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    /// Shorthand for a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    /// Shorthand for a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    /// Shorthand for a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Like, FilterValue::String(pattern.into()))
    }

    /// Shorthand for a case-insensitive LIKE filter.
    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOp::ILike, FilterValue::String(pattern.into()))
    }

    /// Shorthand for list membership.
    pub fn is_in<T: Into<FilterValue>>(field: impl Into<String>, values: Vec<T>) -> Self {
        Self::new(field, FilterOp::In, values)
    }

    /// Shorthand for an `IS NULL` check.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::IsNull, FilterValue::Null)
    }

    /// Shorthand for an `IS NOT NULL` check.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::IsNotNull, FilterValue::Null)
    }

    /// Check the field name and operator/value pairing.
    pub fn validate(&self) -> AppResult<()> {
        validate_identifier(&self.field)?;
        match (self.op, &self.value) {
            (FilterOp::In, FilterValue::List(_)) => Ok(()),
            (FilterOp::In, _) => Err(AppError::invalid_argument(format!(
                "IN filter on '{}' requires a list value",
                self.field
            ))),
            (FilterOp::Like | FilterOp::ILike, FilterValue::String(_)) => Ok(()),
            (FilterOp::Like | FilterOp::ILike, _) => Err(AppError::invalid_argument(format!(
                "pattern filter on '{}' requires a string value",
                self.field
            ))),
            (FilterOp::IsNull | FilterOp::IsNotNull, _) => Ok(()),
            (_, FilterValue::List(_)) => Err(AppError::invalid_argument(format!(
                "list value on '{}' is only valid with IN",
                self.field
            ))),
            _ => Ok(()),
        }
    }
}

/// A boolean-valued predicate over entity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// A single condition.
    Field(FilterField),
    /// All children must hold. An empty list matches everything.
    And(Vec<Filter>),
    /// At least one child must hold. An empty list matches nothing.
    Or(Vec<Filter>),
    /// The child must not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// Combine with another filter using AND.
    pub fn and(self, other: impl Into<Filter>) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other.into());
                Self::And(children)
            }
            first => Self::And(vec![first, other.into()]),
        }
    }

    /// Combine with another filter using OR.
    pub fn or(self, other: impl Into<Filter>) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other.into());
                Self::Or(children)
            }
            first => Self::Or(vec![first, other.into()]),
        }
    }

    /// Negate this filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Validate every condition in the tree.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Self::Field(field) => field.validate(),
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(Filter::validate)
            }
            Self::Not(inner) => inner.validate(),
        }
    }
}

impl From<FilterField> for Filter {
    fn from(field: FilterField) -> Self {
        Self::Field(field)
    }
}
