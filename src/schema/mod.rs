#![forbid(unsafe_code)]

//! Declarative mapping from raw response fragments to typed [`Record`]s.
//!
//! A [`Schema`] is a closed list of [`FieldSpec`]s. Each entry names the raw
//! source path, the record field it lands in and the [`Coercion`] applied on
//! the way. Materialization validates the whole fragment up front: a missing
//! required field or a failing coercion is a [`QueryError::Schema`], never a
//! silently defaulted value.

/// Raw-to-typed value coercions.
pub mod coerce;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::error::{QueryError, Result};
use crate::path::{normalize_field_name, FieldPath, PathSegment};
use crate::record::{Record, RecordContext};
use crate::value::Value;

pub use coerce::{Coercion, DateFormat, EnumMap};
use coerce::CoerceCtx;

/// One entry of a schema's field table.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    /// Record field name.
    pub name: String,
    /// Path of the value inside the raw fragment.
    pub source: FieldPath,
    /// Coercion applied to the raw value.
    pub coercion: Coercion,
    /// Whether absence or null is a materialization error.
    pub required: bool,
}

/// Field table for one kind of record.
pub struct Schema {
    name: String,
    fields: Vec<FieldSpec>,
    by_name: HashMap<String, usize>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

impl Schema {
    /// Starts a schema declaration.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            error: None,
        }
    }

    /// Schema name, used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Record field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Looks up a field by record name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Translates a record path into the raw fragment path it reads from.
    ///
    /// Paths crossing a list of nested records may either index an element
    /// (`parties__0__name`) or address every element (`parties__name`).
    /// Returns `None` when the path is not declared.
    pub fn source_path(&self, path: &FieldPath) -> Option<FieldPath> {
        let head = path.head()?;
        let spec = self.field(head)?;
        let rest = path.tail();
        if rest.is_empty() {
            return Some(spec.source.clone());
        }
        match &spec.coercion {
            Coercion::Nested(nested) => Some(spec.source.join(&nested.source_path(&rest)?)),
            Coercion::NestedList(nested) => match rest.segments().first() {
                Some(PathSegment::Index(idx)) => {
                    let inner = rest.tail();
                    let base = spec.source.child(PathSegment::Index(*idx));
                    if inner.is_empty() {
                        Some(base)
                    } else {
                        Some(base.join(&nested.source_path(&inner)?))
                    }
                }
                _ => Some(spec.source.join(&nested.source_path(&rest)?)),
            },
            Coercion::List(_) | Coercion::Passthrough => match rest.segments() {
                [PathSegment::Index(_)] => Some(spec.source.join(&rest)),
                _ => None,
            },
            _ => None,
        }
    }

    /// True when `path` addresses a declared field.
    pub fn has_path(&self, path: &FieldPath) -> bool {
        self.source_path(path).is_some()
    }

    /// Returns an error naming `path` when it is not declared.
    pub fn check_path(&self, path: &FieldPath) -> Result<()> {
        if self.has_path(path) {
            Ok(())
        } else {
            Err(QueryError::UnknownField {
                schema: self.name.clone(),
                field: path.column_name(),
            })
        }
    }

    /// Materializes a standalone record (no source context, no relations).
    pub fn materialize(self: &Arc<Self>, raw: &Json) -> Result<Record> {
        let values = self.decode(raw, &FieldPath::default())?;
        Ok(Record::from_parts(Arc::clone(self), values, None))
    }

    /// Materializes a record able to resolve its source's related fields.
    pub(crate) fn materialize_with(
        self: &Arc<Self>,
        raw: &Json,
        context: RecordContext,
    ) -> Result<Record> {
        let values = self.decode(raw, &FieldPath::default())?;
        Ok(Record::from_parts(Arc::clone(self), values, Some(context)))
    }

    pub(crate) fn materialize_at(self: &Arc<Self>, raw: &Json, prefix: &FieldPath) -> Result<Record> {
        let values = self.decode(raw, prefix)?;
        Ok(Record::from_parts(Arc::clone(self), values, None))
    }

    fn decode(&self, raw: &Json, prefix: &FieldPath) -> Result<Vec<Value>> {
        if !raw.is_object() {
            let at = if prefix.is_empty() {
                "<root>".to_owned()
            } else {
                prefix.column_name()
            };
            return Err(QueryError::schema(&self.name, at, raw, "expected an object"));
        }
        let mut values = Vec::with_capacity(self.fields.len());
        for spec in &self.fields {
            let path = prefix.child(PathSegment::Field(spec.name.clone()));
            let found = spec.source.lookup_json(raw).filter(|v| !v.is_null());
            let value = match found {
                Some(raw_value) => {
                    let ctx = CoerceCtx {
                        schema: &self.name,
                        path,
                    };
                    spec.coercion.apply(raw_value, &ctx)?
                }
                None if spec.required => {
                    return Err(QueryError::schema(
                        &self.name,
                        path.column_name(),
                        &Json::Null,
                        format!("is required but '{}' is absent", spec.source.dotted()),
                    ));
                }
                None => Value::Null,
            };
            values.push(value);
        }
        Ok(values)
    }
}

/// Incremental schema declaration. The first declaration error is kept and
/// returned by [`SchemaBuilder::build`].
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    error: Option<QueryError>,
}

impl SchemaBuilder {
    /// Optional field named after the normalized last segment of `source`.
    pub fn field(self, source: &str, coercion: Coercion) -> Self {
        self.declare(None, source, coercion, false)
    }

    /// Required field named after the normalized last segment of `source`.
    pub fn required(self, source: &str, coercion: Coercion) -> Self {
        self.declare(None, source, coercion, true)
    }

    /// Field with an explicit record name.
    pub fn named(self, name: &str, source: &str, coercion: Coercion, required: bool) -> Self {
        self.declare(Some(name), source, coercion, required)
    }

    /// Adds a fully specified entry.
    pub fn push(mut self, spec: FieldSpec) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.fields.iter().any(|f| f.name == spec.name) {
            self.error = Some(QueryError::InvalidSchema(format!(
                "schema {} declares field '{}' twice",
                self.name, spec.name
            )));
            return self;
        }
        self.fields.push(spec);
        self
    }

    fn declare(mut self, name: Option<&str>, source: &str, coercion: Coercion, required: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        let source_path = FieldPath::parse(source);
        let name = match name {
            Some(name) => name.to_owned(),
            None => match source_path.last_field() {
                Some(last) => normalize_field_name(last),
                None => {
                    self.error = Some(QueryError::InvalidSchema(format!(
                        "schema {}: source path '{source}' names no field",
                        self.name
                    )));
                    return self;
                }
            },
        };
        self.push(FieldSpec {
            name,
            source: source_path,
            coercion,
            required,
        })
    }

    /// Finishes the declaration.
    pub fn build(self) -> Result<Arc<Schema>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.fields.is_empty() {
            return Err(QueryError::InvalidSchema(format!(
                "schema {} declares no fields",
                self.name
            )));
        }
        let by_name = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect();
        Ok(Arc::new(Schema {
            name: self.name,
            fields: self.fields,
            by_name,
        }))
    }
}
