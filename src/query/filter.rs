//! Predicates carried by a [`Query`](super::Query).

use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;
use crate::path::FieldPath;
use crate::value::Value;

/// Comparison applied by a filter. Predicates are AND-combined; there is no OR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Member of a list literal.
    In,
    /// Substring match, case-sensitive.
    Contains,
    /// Substring match, case-insensitive.
    IContains,
    /// Prefix match.
    StartsWith,
    /// Null test; the literal is a boolean.
    IsNull,
}

impl Operator {
    /// Lookup suffix used by [`Operator::from_str`] and HTTP parameter names.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::IsNull => "isnull",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "eq" | "exact" | "=" | "==" => Operator::Eq,
            "ne" | "!=" => Operator::Ne,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "in" => Operator::In,
            "contains" => Operator::Contains,
            "icontains" => Operator::IContains,
            "startswith" => Operator::StartsWith,
            "isnull" => Operator::IsNull,
            other => return Err(QueryError::InvalidQuery(format!("unknown operator '{other}'"))),
        })
    }
}

/// Left-hand side of a filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// The source's declared primary identifier, resolved by the registry.
    PrimaryKey,
    /// Explicit record path.
    Path(FieldPath),
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterField::PrimaryKey => f.write_str("<pk>"),
            FilterField::Path(path) => write!(f, "{path}"),
        }
    }
}

/// One `(field, operator, value)` predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    /// Filtered field.
    pub field: FilterField,
    /// Comparison.
    pub op: Operator,
    /// Literal operand.
    pub value: Value,
}

impl Filter {
    /// Record path of the filter; `None` while it still targets the
    /// unresolved primary key.
    pub fn path(&self) -> Option<&FieldPath> {
        match &self.field {
            FilterField::Path(path) => Some(path),
            FilterField::PrimaryKey => None,
        }
    }
}

/// Splits a Django-style lookup (`filing_date__gte`) into path and operator.
/// A trailing segment that is not an operator belongs to the path.
pub fn parse_lookup(expr: &str) -> (FieldPath, Operator) {
    if let Some((head, suffix)) = expr.rsplit_once("__") {
        if let Ok(op) = suffix.parse::<Operator>() {
            if !head.is_empty() {
                return (FieldPath::parse(head), op);
            }
        }
    }
    (FieldPath::parse(expr), Operator::Eq)
}
