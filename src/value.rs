//! Dynamic values and attribute paths.
//!
//! A [`Value`] is a schema-typed tree that may contain unknown leaves (values
//! that cannot be determined until apply). Equality is type-aware: sets compare
//! without regard to element order, and numbers compare numerically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or explicitly null.
    #[default]
    Null,
    /// Not known until apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(serde_json::Number),
    /// A string.
    String(String),
    /// An ordered sequence.
    List(Vec<Value>),
    /// An unordered collection of distinct elements.
    Set(Vec<Value>),
    /// String-keyed elements of one type.
    Map(BTreeMap<String, Value>),
    /// Named attributes of possibly different types.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Create a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Create an integer value.
    pub fn int(n: i64) -> Self {
        Self::Number(n.into())
    }

    /// Create a floating point value; non-finite numbers become null.
    pub fn float(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Self::Number)
            .unwrap_or(Self::Null)
    }

    /// Create an object from `(name, value)` pairs.
    pub fn object<K, I>(attrs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value is itself known. Nested unknowns are not considered.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this value contains no unknowns at any depth.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Self::Unknown => false,
            Self::List(items) | Self::Set(items) => items.iter().all(Value::is_wholly_known),
            Self::Map(items) | Self::Object(items) => items.values().all(Value::is_wholly_known),
            _ => true,
        }
    }

    /// Look up an object attribute.
    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Object(attrs) => attrs.get(name),
            _ => None,
        }
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the elements of a list or set.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unknown => "unknown",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// Follow a path into this value.
    pub fn get_path(&self, path: &AttributePath) -> Option<&Value> {
        let mut current = self;
        for step in path.steps() {
            current = match (step, current) {
                (PathStep::Attr(name), Self::Object(attrs)) => attrs.get(name)?,
                (PathStep::Key(key), Self::Map(items)) => items.get(key)?,
                (PathStep::Key(key), Self::Object(attrs)) => attrs.get(key)?,
                (PathStep::Index(i), Self::List(items) | Self::Set(items)) => {
                    items.get(usize::try_from(*i).ok()?)?
                },
                _ => return None,
            };
        }
        Some(current)
    }

    /// Build a value from untyped JSON. Objects become objects, arrays become lists.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.clone()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(attrs) => Self::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to untyped JSON, replacing unknowns with null and collecting
    /// their paths.
    pub fn to_json_lossy(&self, unknown_paths: &mut Vec<AttributePath>) -> serde_json::Value {
        self.to_json_at(&AttributePath::root(), unknown_paths)
    }

    fn to_json_at(
        &self,
        path: &AttributePath,
        unknown_paths: &mut Vec<AttributePath>,
    ) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Unknown => {
                unknown_paths.push(path.clone());
                serde_json::Value::Null
            },
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) | Self::Set(items) => serde_json::Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v.to_json_at(&path.clone().index(i as i64), unknown_paths))
                    .collect(),
            ),
            Self::Map(items) => serde_json::Value::Object(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_at(&path.clone().key(k), unknown_paths)))
                    .collect(),
            ),
            Self::Object(attrs) => serde_json::Value::Object(
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_at(&path.clone().attr(k), unknown_paths)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unknown, Self::Unknown) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers_equal(a, b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|y| a.contains(y))
            },
            (Self::Map(a), Self::Map(b)) | (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a.as_u64(), b.as_u64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::int(n)
    }
}

/// One step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStep {
    /// An object attribute or block name.
    Attr(String),
    /// A map element key.
    Key(String),
    /// A list or set element index.
    Index(i64),
}

/// A path from the root of a value to one of its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePath(Vec<PathStep>);

impl AttributePath {
    /// The empty path, addressing the whole value.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from steps.
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self(steps)
    }

    /// Append an attribute step.
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathStep::Attr(name.into()));
        self
    }

    /// Append a map key step.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathStep::Key(key.into()));
        self
    }

    /// Append an index step.
    pub fn index(mut self, index: i64) -> Self {
        self.0.push(PathStep::Index(index));
        self
    }

    /// The steps of this path.
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &AttributePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                PathStep::Attr(name) if i == 0 => write!(f, "{}", name)?,
                PathStep::Attr(name) => write!(f, ".{}", name)?,
                PathStep::Key(key) => write!(f, "[{:?}]", key)?,
                PathStep::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_equality_ignores_order() {
        let a = Value::Set(vec![Value::string("a"), Value::string("b")]);
        let b = Value::Set(vec![Value::string("b"), Value::string("a")]);
        assert_eq!(a, b);

        let la = Value::List(vec![Value::string("a"), Value::string("b")]);
        let lb = Value::List(vec![Value::string("b"), Value::string("a")]);
        assert_ne!(la, lb);
    }

    #[test]
    fn test_number_equality_is_numeric() {
        assert_eq!(Value::int(3), Value::float(3.0));
        assert_ne!(Value::int(3), Value::float(3.5));
        assert_ne!(Value::int(3), Value::string("3"));
    }

    #[test]
    fn test_wholly_known() {
        let v = Value::object([("a", Value::string("x")), ("b", Value::Unknown)]);
        assert!(v.is_known());
        assert!(!v.is_wholly_known());
        assert!(Value::object([("a", Value::Null)]).is_wholly_known());
    }

    #[test]
    fn test_path_display_and_lookup() {
        let path = AttributePath::root().attr("rule").index(0).attr("tags").key("env");
        assert_eq!(path.to_string(), "rule[0].tags[\"env\"]");

        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), Value::string("prod"));
        let v = Value::object([(
            "rule",
            Value::List(vec![Value::object([("tags", Value::Map(tags))])]),
        )]);
        assert_eq!(v.get_path(&path), Some(&Value::string("prod")));
        assert_eq!(v.get_path(&AttributePath::root().attr("missing")), None);
        assert!(path.starts_with(&AttributePath::root().attr("rule")));
    }

    #[test]
    fn test_json_conversion_tracks_unknowns() {
        let v = Value::object([("id", Value::Unknown), ("name", Value::string("web"))]);
        let mut unknown = Vec::new();
        let json = v.to_json_lossy(&mut unknown);
        assert_eq!(json, json!({"id": null, "name": "web"}));
        assert_eq!(unknown, vec![AttributePath::root().attr("id")]);

        let back = Value::from_json(&json!({"name": "web", "ports": [80, 443]}));
        assert_eq!(
            back.get_attr("ports"),
            Some(&Value::List(vec![Value::int(80), Value::int(443)]))
        );
    }
}
