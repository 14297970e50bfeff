//! Snapshot values read from the shared document.
//!
//! A `Value` is an immutable tree. Composite nodes are reference counted, so
//! cloning is cheap and two snapshots can share every subtree that did not
//! change between them. The preview engine relies on that sharing: identity
//! (see [`Value::same`]) is what it compares, never deep equality.
//!
//! Reconcile and Hydrate are implemented by hand so that any schema-shaped
//! value can be written into and read out of an Automerge document.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use automerge::{ObjId, ObjType, ScalarValue, Value as AmValue};
use autosurgeon::reconcile::{MapReconciler, NoKey, SeqReconciler};
use autosurgeon::{Hydrate, HydrateError, ReadDoc, Reconcile, Reconciler};
use serde::{Deserialize, Serialize};

use crate::error::{CollabError, CollabResult};

/// Shared list payload. Its pointer identity is the array's identity.
pub type ListValue = Arc<Vec<Value>>;

/// Shared map payload.
pub type MapValue = Arc<BTreeMap<String, Value>>;

// =============================================================================
// VALUE
// =============================================================================

/// A schema-shaped value as seen in one snapshot of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(ListValue),
    Map(MapValue),
}

impl Value {
    /// Builds a map value from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Builds a list value.
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Reference identity.
    ///
    /// Composites and strings compare by pointer, other scalars by value.
    /// Two structurally equal lists built separately are *not* the same.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListValue> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Resolves a document path relative to this value.
    pub fn at_path(&self, path: &[DocProp]) -> CollabResult<&Value> {
        let mut current = self;
        for (depth, prop) in path.iter().enumerate() {
            current = match (prop, current) {
                (DocProp::Key(key), Value::Map(entries)) => entries
                    .get(key)
                    .ok_or_else(|| CollabError::path_not_found(display_path(&path[..=depth])))?,
                (DocProp::Index(index), Value::List(items)) => items
                    .get(*index)
                    .ok_or_else(|| CollabError::index_out_of_bounds(*index, items.len()))?,
                (prop, other) => {
                    return Err(CollabError::schema_violation(format!(
                        "cannot address '{}' inside a {} at {}",
                        prop,
                        other.kind_name(),
                        display_path(&path[..depth])
                    )))
                }
            };
        }
        Ok(current)
    }

    /// Returns a new root with the value at `path` replaced by `new`.
    ///
    /// Only the nodes along the path are copied; every other subtree keeps
    /// its identity, and `new` itself is stored as given.
    pub fn replace_at(&self, path: &[DocProp], new: Value) -> CollabResult<Value> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(new);
        };
        match (head, self) {
            (DocProp::Key(key), Value::Map(entries)) => {
                let updated = match entries.get(key) {
                    Some(child) => child.replace_at(rest, new)?,
                    None if rest.is_empty() => new,
                    None => return Err(CollabError::path_not_found(display_path(path))),
                };
                let mut next = (**entries).clone();
                next.insert(key.clone(), updated);
                Ok(Value::Map(Arc::new(next)))
            }
            (DocProp::Index(index), Value::List(items)) => {
                let child = items
                    .get(*index)
                    .ok_or_else(|| CollabError::index_out_of_bounds(*index, items.len()))?;
                let updated = child.replace_at(rest, new)?;
                let mut next = (**items).clone();
                next[*index] = updated;
                Ok(Value::List(Arc::new(next)))
            }
            (prop, other) => Err(CollabError::schema_violation(format!(
                "cannot write '{}' inside a {}",
                prop,
                other.kind_name()
            ))),
        }
    }

    /// Structural sharing: returns `new`, but with every subtree that is
    /// structurally equal to the matching subtree of `old` replaced by the
    /// `old` one. If nothing changed, `old` itself is returned.
    pub fn share(old: &Value, new: Value) -> Value {
        if old.same(&new) {
            return new;
        }
        match (old, new) {
            (Value::Map(prev), Value::Map(next)) => {
                let mut changed = prev.len() != next.len();
                let mut merged = BTreeMap::new();
                for (key, value) in next.iter() {
                    let value = match prev.get(key) {
                        Some(before) => {
                            let shared = Value::share(before, value.clone());
                            changed |= !shared.same(before);
                            shared
                        }
                        None => {
                            changed = true;
                            value.clone()
                        }
                    };
                    merged.insert(key.clone(), value);
                }
                if changed {
                    Value::Map(Arc::new(merged))
                } else {
                    old.clone()
                }
            }
            (Value::List(prev), Value::List(next)) => {
                let mut changed = prev.len() != next.len();
                let mut merged = Vec::with_capacity(next.len());
                for (index, value) in next.iter().enumerate() {
                    let value = match prev.get(index) {
                        Some(before) => {
                            let shared = Value::share(before, value.clone());
                            changed |= !shared.same(before);
                            shared
                        }
                        None => value.clone(),
                    };
                    merged.push(value);
                }
                if changed {
                    Value::List(Arc::new(merged))
                } else {
                    old.clone()
                }
            }
            (prev, next) if *prev == next => prev.clone(),
            (_, next) => next,
        }
    }

    /// Converts to a JSON value (lossy only for non-finite floats).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => items.iter().map(Value::to_json).collect(),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.into()),
            serde_json::Value::Array(items) => {
                Value::list(items.into_iter().map(Value::from))
            }
            serde_json::Value::Object(entries) => {
                Value::map(entries.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

// =============================================================================
// DOCUMENT PATHS
// =============================================================================

/// One step of a path into the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocProp {
    Key(String),
    Index(usize),
}

/// Absolute path from the document root.
pub type DocPath = Vec<DocProp>;

impl fmt::Display for DocProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocProp::Key(key) => f.write_str(key),
            DocProp::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for DocProp {
    fn from(key: &str) -> Self {
        DocProp::Key(key.to_string())
    }
}

impl From<String> for DocProp {
    fn from(key: String) -> Self {
        DocProp::Key(key)
    }
}

impl From<usize> for DocProp {
    fn from(index: usize) -> Self {
        DocProp::Index(index)
    }
}

/// Renders a path as `/a/0/b` (the root is `/`).
pub fn display_path(path: &[DocProp]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|p| format!("/{}", p)).collect()
}

// =============================================================================
// AUTOMERGE MAPPING
// =============================================================================

/// Writes lists index by index so unchanged positions reconcile in place,
/// and maps key by key, deleting keys the value no longer has.
impl Reconcile for Value {
    type Key<'a> = NoKey;

    fn reconcile<R: Reconciler>(&self, mut reconciler: R) -> Result<(), R::Error> {
        match self {
            Value::Null => reconciler.none(),
            Value::Bool(b) => reconciler.boolean(*b),
            Value::Int(i) => reconciler.i64(*i),
            Value::Float(f) => reconciler.f64(*f),
            Value::Str(s) => reconciler.str(&**s),
            Value::List(items) => {
                let mut seq = reconciler.seq()?;
                let existing = seq.len()?;
                for (index, item) in items.iter().enumerate() {
                    if index < existing {
                        seq.set(index, item)?;
                    } else {
                        seq.insert(index, item)?;
                    }
                }
                for index in (items.len()..existing).rev() {
                    seq.delete(index)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                let mut m = reconciler.map()?;
                let stale: Vec<String> = m
                    .entries()
                    .map(|(key, _)| key.to_string())
                    .filter(|key| !entries.contains_key(key))
                    .collect();
                for key in stale {
                    m.delete(&key)?;
                }
                for (key, value) in entries.iter() {
                    m.put(key, value)?;
                }
                Ok(())
            }
        }
    }
}

impl Hydrate for Value {
    fn hydrate_map<D: ReadDoc>(doc: &D, obj: &ObjId) -> Result<Self, HydrateError> {
        let keys: Vec<String> = doc.map_range(obj, ..).map(|item| item.key.to_string()).collect();
        let mut entries = BTreeMap::new();
        for key in keys {
            if let Some((value, id)) = doc.get(obj, key.as_str())? {
                entries.insert(key, hydrate_entry(doc, value, &id)?);
            }
        }
        Ok(Value::Map(Arc::new(entries)))
    }

    fn hydrate_seq<D: ReadDoc>(doc: &D, obj: &ObjId) -> Result<Self, HydrateError> {
        let length = doc.length(obj);
        let mut items = Vec::with_capacity(length);
        for index in 0..length {
            match doc.get(obj, index)? {
                Some((value, id)) => items.push(hydrate_entry(doc, value, &id)?),
                None => items.push(Value::Null),
            }
        }
        Ok(Value::List(Arc::new(items)))
    }
}

fn hydrate_entry<D: ReadDoc>(
    doc: &D,
    value: AmValue<'_>,
    id: &ObjId,
) -> Result<Value, HydrateError> {
    match value {
        AmValue::Object(ObjType::Map) | AmValue::Object(ObjType::Table) => {
            Value::hydrate_map(doc, id)
        }
        AmValue::Object(ObjType::List) => Value::hydrate_seq(doc, id),
        AmValue::Object(ObjType::Text) => Ok(Value::Str(doc.text(id)?.into())),
        AmValue::Scalar(scalar) => Ok(from_scalar(scalar.as_ref())),
    }
}

fn from_scalar(scalar: &ScalarValue) -> Value {
    match scalar {
        ScalarValue::Null => Value::Null,
        ScalarValue::Boolean(b) => Value::Bool(*b),
        ScalarValue::Int(i) => Value::Int(*i),
        ScalarValue::Uint(u) => i64::try_from(*u)
            .map(Value::Int)
            .unwrap_or(Value::Float(*u as f64)),
        ScalarValue::F64(f) => Value::Float(*f),
        ScalarValue::Timestamp(_) | ScalarValue::Counter(_) => {
            scalar.to_i64().map(Value::Int).unwrap_or(Value::Null)
        }
        ScalarValue::Str(s) => Value::Str(s.as_str().into()),
        other => {
            tracing::warn!(scalar = ?other, "unsupported scalar hydrated as null");
            Value::Null
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_is_identity_not_equality() {
        let a = Value::list(vec![Value::from(1), Value::from(2)]);
        let b = Value::list(vec![Value::from(1), Value::from(2)]);
        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert!(a.same(&a.clone()));
        assert!(Value::from(3).same(&Value::from(3)));
    }

    #[test]
    fn test_from_json() {
        let json = json!({"count": 0, "ratio": 0.5, "tags": ["x"], "on": true, "none": null});
        let value = Value::from(json.clone());
        assert_eq!(value.get("count"), Some(&Value::Int(0)));
        assert_eq!(value.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(value.get("tags").and_then(Value::as_list).map(|l| l.len()), Some(1));
        assert_eq!(value.get("on").and_then(Value::as_bool), Some(true));
        assert!(value.get("none").unwrap().is_null());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_replace_at_copies_only_the_path() {
        let root = Value::from(json!({"a": {"b": 1}, "c": [1, 2]}));
        let updated = root
            .replace_at(&["a".into(), "b".into()], Value::from(2))
            .unwrap();

        assert_eq!(updated.at_path(&["a".into(), "b".into()]).unwrap(), &Value::Int(2));
        assert!(updated.get("c").unwrap().same(root.get("c").unwrap()));
        assert!(!updated.get("a").unwrap().same(root.get("a").unwrap()));
    }

    #[test]
    fn test_replace_at_keeps_written_identity() {
        let root = Value::from(json!({"tags": ["x"]}));
        let tags = Value::list(vec![Value::from("y")]);
        let updated = root.replace_at(&["tags".into()], tags.clone()).unwrap();
        assert!(updated.get("tags").unwrap().same(&tags));
    }

    #[test]
    fn test_replace_at_errors() {
        let root = Value::from(json!({"c": [1]}));
        assert!(matches!(
            root.replace_at(&["c".into(), 3.into()], Value::Null),
            Err(CollabError::IndexOutOfBounds { index: 3, length: 1 })
        ));
        assert!(matches!(
            root.replace_at(&["missing".into(), "x".into()], Value::Null),
            Err(CollabError::PathNotFound(_))
        ));
        assert!(matches!(
            root.replace_at(&["c".into(), "x".into()], Value::Null),
            Err(CollabError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_share_keeps_unchanged_subtrees() {
        let old = Value::from(json!({"a": {"x": 1}, "b": [1, 2], "c": "s"}));
        let new = Value::from(json!({"a": {"x": 1}, "b": [1, 3], "c": "s"}));
        let shared = Value::share(&old, new);

        assert!(shared.get("a").unwrap().same(old.get("a").unwrap()));
        assert!(shared.get("c").unwrap().same(old.get("c").unwrap()));
        assert!(!shared.get("b").unwrap().same(old.get("b").unwrap()));
        assert_eq!(shared.get("b").unwrap(), &Value::from(json!([1, 3])));
    }

    #[test]
    fn test_share_returns_old_when_equal() {
        let old = Value::from(json!({"a": [1, {"b": 2}]}));
        let new = Value::from(json!({"a": [1, {"b": 2}]}));
        assert!(Value::share(&old, new).same(&old));
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(&[]), "/");
        assert_eq!(display_path(&["tags".into(), 2.into()]), "/tags/2");
    }
}
