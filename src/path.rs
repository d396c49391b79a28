//! Field paths shared by queries, schemas and projections.
//!
//! A path is written either Django-style (`parties__0__name`) or dotted
//! (`parties.0.name`). Purely numeric segments address sequence elements.

use std::fmt;

use smallvec::SmallVec;

/// One step of a [`FieldPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Named field of a record or object.
    Field(String),
    /// Element of a sequence.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

/// Ordered sequence of segments addressing a (possibly nested) value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(SmallVec<[PathSegment; 4]>);

impl FieldPath {
    /// Parses `a__b__0` or `a.b.0`. Empty segments are dropped.
    pub fn parse(input: &str) -> Self {
        let parts: Box<dyn Iterator<Item = &str>> = if input.contains("__") {
            Box::new(input.split("__"))
        } else {
            Box::new(input.split('.'))
        };
        FieldPath(
            parts
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| match part.parse::<usize>() {
                    Ok(idx) => PathSegment::Index(idx),
                    Err(_) => PathSegment::Field(part.to_owned()),
                })
                .collect(),
        )
    }

    /// Path with a single named segment.
    pub fn field(name: impl Into<String>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(PathSegment::Field(name.into()));
        FieldPath(segments)
    }

    /// Returns the segments in order.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// True when the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First segment when it names a field.
    pub fn head(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Path without its first segment.
    pub fn tail(&self) -> FieldPath {
        FieldPath(self.0.iter().skip(1).cloned().collect())
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: PathSegment) -> FieldPath {
        let mut segments = self.0.clone();
        segments.push(segment);
        FieldPath(segments)
    }

    /// Returns a new path with `other` appended.
    pub fn join(&self, other: &FieldPath) -> FieldPath {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        FieldPath(segments)
    }

    /// True when `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Last named segment, used for column and field naming.
    pub fn last_field(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|seg| match seg {
            PathSegment::Field(name) => Some(name.as_str()),
            PathSegment::Index(_) => None,
        })
    }

    /// Renders the path with `__` separators, the column naming convention.
    pub fn column_name(&self) -> String {
        self.join_with("__")
    }

    /// Renders the path with `.` separators.
    pub fn dotted(&self) -> String {
        self.join_with(".")
    }

    fn join_with(&self, sep: &str) -> String {
        let mut out = String::new();
        for (idx, seg) in self.0.iter().enumerate() {
            if idx > 0 {
                out.push_str(sep);
            }
            out.push_str(&seg.to_string());
        }
        out
    }

    /// Follows the path through a raw JSON fragment.
    pub fn lookup_json<'a>(&self, raw: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        let mut current = raw;
        for seg in &self.0 {
            current = match (seg, current) {
                (PathSegment::Field(name), serde_json::Value::Object(map)) => map.get(name)?,
                (PathSegment::Index(idx), serde_json::Value::Array(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Follows the path through a raw JSON fragment, fanning out across arrays
    /// met on named segments. Used to evaluate predicates on one-to-many fields.
    pub fn lookup_json_all<'a>(&self, raw: &'a serde_json::Value) -> Vec<&'a serde_json::Value> {
        let mut current = vec![raw];
        for seg in &self.0 {
            let mut next = Vec::new();
            for value in current {
                collect_segment(seg, value, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

fn collect_segment<'a>(
    seg: &PathSegment,
    value: &'a serde_json::Value,
    out: &mut Vec<&'a serde_json::Value>,
) {
    match (seg, value) {
        (PathSegment::Field(name), serde_json::Value::Object(map)) => {
            if let Some(found) = map.get(name) {
                out.push(found);
            }
        }
        (PathSegment::Field(_), serde_json::Value::Array(items)) => {
            for item in items {
                collect_segment(seg, item, out);
            }
        }
        (PathSegment::Index(idx), serde_json::Value::Array(items)) => {
            if let Some(found) = items.get(*idx) {
                out.push(found);
            }
        }
        _ => {}
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        FieldPath::parse(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        FieldPath::parse(&value)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(value: &FieldPath) -> Self {
        value.clone()
    }
}

/// Normalizes a remote field name to `snake_case`.
///
/// Handles `camelCase`, `PascalCase`, `kebab-case`, spaces and acronyms:
/// `appealNumber` → `appeal_number`, `USApplicationID` → `us_application_id`.
pub fn normalize_field_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, &ch) in chars.iter().enumerate() {
        if ch == '-' || ch == ' ' || ch == '.' || ch == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_uppercase() {
            let prev = idx.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(idx + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
