//! 🧱 Structured values: the dynamically-typed property bags builds carry around.
//!
//! Each value holds an optional `kind` discriminant. A value whose kind was never set
//! is legal to hold in memory but refuses to serialize, exactly like the upstream
//! re-serializers do. [`fill_null_kinds`] is the fix: it walks the tree and stamps an
//! explicit `Null` on every value that forgot what it was.

use std::collections::BTreeMap;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, Serializer};
use serde_json::Value;

/// 📦 A property map. Sorted, so anything derived from it is deterministic.
pub type Struct = BTreeMap<String, StructValue>;

/// 🎯 One dynamically typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructValue {
    pub kind: Option<Kind>,
}

/// 🏷️ The discriminant. Numbers are doubles, same as the upstream wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Struct(Struct),
    List(Vec<StructValue>),
}

impl StructValue {
    pub fn new(kind: Kind) -> Self {
        Self { kind: Some(kind) }
    }

    /// 👻 A value with no discriminant at all. Only useful for proving that
    /// [`fill_null_kinds`] does its job.
    pub fn unset() -> Self {
        Self { kind: None }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Kind::String(s.into()))
    }

    pub fn structure(fields: Struct) -> Self {
        Self::new(Kind::Struct(fields))
    }

    /// 🔤 The string payload, if this value is a string. Anything else is `None`.
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Some(Kind::String(s)) => Some(s),
            _ => None,
        }
    }

    /// 🔄 Lower into plain JSON. Fails on the first value without a kind, and on
    /// numbers JSON cannot represent.
    pub fn to_json(&self) -> Result<Value, String> {
        match &self.kind {
            None => Err("structured value has no kind set".to_string()),
            Some(Kind::Null) => Ok(Value::Null),
            Some(Kind::Bool(b)) => Ok(Value::Bool(*b)),
            Some(Kind::String(s)) => Ok(Value::String(s.clone())),
            Some(Kind::Number(n)) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| format!("number {n} has no JSON representation")),
            Some(Kind::List(items)) => items
                .iter()
                .map(StructValue::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Some(Kind::Struct(fields)) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (key, value) in fields {
                    map.insert(key.clone(), value.to_json()?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

impl From<Value> for StructValue {
    fn from(value: Value) -> Self {
        let kind = match value {
            Value::Null => Kind::Null,
            Value::Bool(b) => Kind::Bool(b),
            // ⚠️ every JSON number lands as a double; integers past 2^53 lose precision
            Value::Number(n) => Kind::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Kind::String(s),
            Value::Array(items) => Kind::List(items.into_iter().map(StructValue::from).collect()),
            Value::Object(map) => Kind::Struct(
                map.into_iter()
                    .map(|(key, value)| (key, StructValue::from(value)))
                    .collect(),
            ),
        };
        StructValue::new(kind)
    }
}

impl<'de> Deserialize<'de> for StructValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(StructValue::from)
    }
}

impl Serialize for StructValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().map_err(S::Error::custom)?.serialize(serializer)
    }
}

/// 🩹 Stamp `Kind::Null` on every value in the tree that has no kind.
pub fn fill_null_kinds(value: &mut StructValue) {
    match &mut value.kind {
        None => value.kind = Some(Kind::Null),
        Some(Kind::Struct(fields)) => fields.values_mut().for_each(fill_null_kinds),
        Some(Kind::List(items)) => items.iter_mut().for_each(fill_null_kinds),
        Some(_) => {}
    }
}
