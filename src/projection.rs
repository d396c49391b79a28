//! Row, table and set views over materialized records.
//!
//! Column names are record paths joined with `__`; sequence elements
//! contribute their index (`inventors__0__name`). Nothing here fetches: the
//! cursor drains first and hands over its cache.

use std::collections::{HashMap, HashSet};

use crate::path::{FieldPath, PathSegment};
use crate::query::Projection;
use crate::record::Record;
use crate::value::{Value, ValueKey};

/// One output row: column names and values in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    /// Value of `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    /// Cells in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a row with no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn set(&mut self, column: String, value: Value) {
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }
}

/// Rectangular result: the ordered union of row columns, missing cells null.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Flattens `rows` down to `depth` levels of nesting and aligns them on
    /// the union of their columns in first-seen order.
    pub fn from_rows(rows: &[Row], depth: usize) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut flat_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let mut flat = Row::default();
            for (name, value) in row.iter() {
                flatten_into(&mut flat, name.to_owned(), value, depth);
            }
            for column in flat.columns() {
                if !index.contains_key(column) {
                    index.insert(column.to_owned(), columns.len());
                    columns.push(column.to_owned());
                }
            }
            flat_rows.push(flat);
        }
        let rows = flat_rows
            .into_iter()
            .map(|flat| {
                let mut cells = vec![Value::Null; columns.len()];
                for (name, value) in flat.cells {
                    if let Some(&idx) = index.get(&name) {
                        cells[idx] = value;
                    }
                }
                cells
            })
            .collect();
        Table { columns, rows }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows aligned with [`Table::columns`].
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Single cell.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|cells| &cells[idx])
    }
}

fn flatten_into(row: &mut Row, prefix: String, value: &Value, depth: usize) {
    if depth == 0 {
        row.set(prefix, value.clone());
        return;
    }
    match value {
        Value::Record(record) if record.field_names().next().is_some() => {
            for (name, inner) in record.fields() {
                flatten_into(row, format!("{prefix}__{name}"), inner, depth - 1);
            }
        }
        Value::List(items) if !items.is_empty() => {
            for (idx, inner) in items.iter().enumerate() {
                flatten_into(row, format!("{prefix}__{idx}"), inner, depth - 1);
            }
        }
        Value::List(_) => row.set(prefix, Value::Null),
        other => row.set(prefix, other.clone()),
    }
}

/// Resolves `segments` below `value`, collecting across sequences when a
/// named segment meets a list.
fn resolve(value: &Value, segments: &[PathSegment]) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return value.clone();
    };
    match (first, value) {
        (PathSegment::Field(name), Value::Record(record)) => match record.get(name) {
            Some(inner) => resolve(inner, rest),
            None => Value::Null,
        },
        (PathSegment::Field(_), Value::List(items)) => {
            Value::List(items.iter().map(|item| resolve(item, segments)).collect())
        }
        (PathSegment::Index(idx), Value::List(items)) => match items.get(*idx) {
            Some(inner) => resolve(inner, rest),
            None => Value::Null,
        },
        _ => Value::Null,
    }
}

fn resolve_record(record: &Record, path: &FieldPath) -> Value {
    let Some(head) = path.head() else {
        return Value::Null;
    };
    match record.get(head) {
        Some(value) => resolve(value, &path.segments()[1..]),
        None => Value::Null,
    }
}

/// Projects records into rows, one per record, or one per element of the
/// exploded field. An empty or absent exploded field still yields one row,
/// with null in its place.
pub fn rows(records: &[Record], projection: Option<&Projection>, explode: Option<&FieldPath>) -> Vec<Row> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let Some(explode) = explode else {
            out.push(project(record, projection, None));
            continue;
        };
        match resolve_record(record, explode) {
            Value::List(items) if !items.is_empty() => {
                for item in &items {
                    out.push(project(record, projection, Some((explode, item))));
                }
            }
            Value::List(_) => out.push(project(record, projection, Some((explode, &Value::Null)))),
            single => out.push(project(record, projection, Some((explode, &single)))),
        }
    }
    out
}

fn project(record: &Record, projection: Option<&Projection>, element: Option<(&FieldPath, &Value)>) -> Row {
    let mut row = Row::default();
    match projection {
        Some(projection) => {
            for path in projection.paths() {
                row.set(path.column_name(), cell(record, path, element));
            }
        }
        None => {
            for (name, value) in record.fields() {
                row.set(name.to_owned(), value.clone());
            }
            if let Some((path, item)) = element {
                row.set(path.column_name(), item.clone());
            }
        }
    }
    row
}

fn cell(record: &Record, path: &FieldPath, element: Option<(&FieldPath, &Value)>) -> Value {
    if let Some((exploded, item)) = element {
        if exploded.is_prefix_of(path) {
            return resolve(item, &path.segments()[exploded.len()..]);
        }
    }
    resolve_record(record, path)
}

/// Distinct values of `column` in first-seen order. Sequence values
/// contribute their elements; nulls are skipped.
pub fn distinct(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen: HashSet<ValueKey> = HashSet::new();
    let mut out = Vec::new();
    let mut push = |value: &Value| {
        if !value.is_null() && seen.insert(value.key()) {
            out.push(value.clone());
        }
    };
    for row in rows {
        match row.get(column) {
            Some(Value::List(items)) => items.iter().for_each(&mut push),
            Some(value) => push(value),
            None => {}
        }
    }
    out
}
