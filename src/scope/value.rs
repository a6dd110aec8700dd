//! Resolved parameter values and the argument bag handed to handlers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::socket::transport::ConnectionHandle;

/// Typed key/value container for an inbound payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Value produced by a dependency provider.
pub type DepValue = Arc<dyn Any + Send + Sync>;

/// A resolved enum member.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub enum_name: String,
    pub name: String,
    pub value: Value,
}

/// A resolved parameter value.
#[derive(Clone)]
pub enum Bound {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Enum(EnumMember),
    Json(Value),
    /// A validated model object (declared fields only).
    Model(Map<String, Value>),
    Message(Arc<Payload>),
    Connection(ConnectionHandle),
    Dependency(DepValue),
}

impl Bound {
    /// JSON rendering used when a value is embedded in a model.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Str(s) => Value::String(s.clone()),
            Self::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Value::String(text.to_string()),
                Err(_) => Value::from(bytes.clone()),
            },
            Self::Enum(member) => Value::String(member.name.clone()),
            Self::Json(value) => value.clone(),
            Self::Model(fields) => Value::Object(fields.clone()),
            Self::Message(payload) => Value::Object(payload.as_map().clone()),
            Self::Connection(_) | Self::Dependency(_) => Value::Null,
        }
    }

    /// Short type label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Enum(_) => "enum",
            Self::Json(_) => "json",
            Self::Model(_) => "model",
            Self::Message(_) => "message",
            Self::Connection(_) => "connection",
            Self::Dependency(_) => "dependency",
        }
    }
}

impl fmt::Debug for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(handle) => write!(f, "Connection({})", handle.id()),
            Self::Dependency(_) => f.write_str("Dependency(..)"),
            Self::Message(payload) => write!(f, "Message({:?})", payload.as_map()),
            other => write!(f, "{}({})", other.kind(), other.to_json()),
        }
    }
}

/// Conversion from a resolved value into a concrete Rust type.
pub trait FromBound: Sized {
    fn from_bound(bound: &Bound) -> Option<Self>;
}

impl FromBound for i64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromBound for i32 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        i64::from_bound(bound).and_then(|i| i32::try_from(i).ok())
    }
}

impl FromBound for u64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        i64::from_bound(bound).and_then(|i| u64::try_from(i).ok())
    }
}

impl FromBound for f64 {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Float(f) => Some(*f),
            Bound::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromBound for bool {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromBound for String {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Str(s) => Some(s.clone()),
            Bound::Enum(member) => Some(member.name.clone()),
            _ => None,
        }
    }
}

impl FromBound for Vec<u8> {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FromBound for EnumMember {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Enum(member) => Some(member.clone()),
            _ => None,
        }
    }
}

impl FromBound for Value {
    fn from_bound(bound: &Bound) -> Option<Self> {
        match bound {
            Bound::Connection(_) | Bound::Dependency(_) => None,
            other => Some(other.to_json()),
        }
    }
}

impl FromBound for Bound {
    fn from_bound(bound: &Bound) -> Option<Self> {
        Some(bound.clone())
    }
}

/// Resolved arguments for one handler invocation.
///
/// Parameters that resolved to no value are simply absent.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: HashMap<String, Bound>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Bound) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, name: &str) -> Option<&Bound> {
        self.values.get(name)
    }

    /// Typed access to a resolved value.
    pub fn get<T: FromBound>(&self, name: &str) -> Option<T> {
        self.values.get(name).and_then(T::from_bound)
    }

    pub fn get_or<T: FromBound>(&self, name: &str, fallback: T) -> T {
        self.get(name).unwrap_or(fallback)
    }

    /// Deserialize a validated model parameter into `T`.
    pub fn model<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, serde_json::Error> {
        match self.values.get(name) {
            Some(Bound::Model(fields)) => serde_json::from_value(Value::Object(fields.clone())).map(Some),
            Some(Bound::Json(value)) => serde_json::from_value(value.clone()).map(Some),
            _ => Ok(None),
        }
    }

    /// The value produced by a dependency parameter.
    pub fn dep<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.values.get(name) {
            Some(Bound::Dependency(value)) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn message(&self, name: &str) -> Option<Arc<Payload>> {
        match self.values.get(name) {
            Some(Bound::Message(payload)) => Some(Arc::clone(payload)),
            _ => None,
        }
    }

    pub fn connection(&self, name: &str) -> Option<ConnectionHandle> {
        match self.values.get(name) {
            Some(Bound::Connection(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Names of every resolved parameter.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_typed_getters() {
        let mut args = Args::new();
        args.insert("count", Bound::Int(7));
        args.insert("name", Bound::Str("ada".into()));

        assert_eq!(args.get::<i64>("count"), Some(7));
        assert_eq!(args.get::<i32>("count"), Some(7));
        assert_eq!(args.get::<f64>("count"), Some(7.0));
        assert_eq!(args.get::<String>("count"), None);
        assert_eq!(args.get::<String>("name").as_deref(), Some("ada"));
        assert_eq!(args.get_or("missing", 3_i64), 3);
        assert!(!args.contains("missing"));
    }

    #[test]
    fn test_model_deserializes() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Card {
            title: String,
            position: i64,
        }

        let mut args = Args::new();
        let fields = json!({"title": "t", "position": 2});
        args.insert("card", Bound::Model(fields.as_object().unwrap().clone()));

        let card: Card = args.model("card").unwrap().unwrap();
        assert_eq!(card, Card { title: "t".into(), position: 2 });
        assert!(args.model::<Card>("other").unwrap().is_none());
    }

    #[test]
    fn test_dependency_downcast() {
        let mut args = Args::new();
        args.insert("db", Bound::Dependency(Arc::new(41_u32)));
        assert_eq!(args.dep::<u32>("db").as_deref(), Some(&41));
        assert!(args.dep::<String>("db").is_none());
    }
}
