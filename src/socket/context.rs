//! Per-connection context captured at upgrade time.
//!
//! The context travels as opaque JSON stored on the transport and is checked
//! again on every callback. Nothing downstream trusts it without going
//! through [`ConnectionContext::from_user_data`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::routing::RouteData;

const RESERVED: [&str; 3] = ["path", "route_path", "route_data"];

/// Where a connection was opened and with what placeholder values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionContext {
    /// Requested path.
    pub path: String,
    /// The pattern that matched `path`.
    pub route_path: String,
    pub route_data: RouteData,
    /// Caller-supplied fields stored next to the reserved ones.
    pub extra: Map<String, Value>,
}

/// The stored context does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("connection has no context")]
    Missing,

    #[error("connection context must be an object")]
    NotAnObject,

    #[error("connection context field {0:?} is missing")]
    MissingField(&'static str),

    #[error("connection context field {field:?} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("route data value for {0:?} must be a string")]
    RouteDataValue(String),
}

impl ConnectionContext {
    pub fn new(path: impl Into<String>, route_path: impl Into<String>, route_data: RouteData) -> Self {
        Self {
            path: path.into(),
            route_path: route_path.into(),
            route_data,
            extra: Map::new(),
        }
    }

    /// Attach caller fields. Reserved keys are ignored.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        for (key, value) in extra {
            if !RESERVED.contains(&key.as_str()) {
                self.extra.insert(key, value);
            }
        }
        self
    }

    /// Validate stored user data and rebuild the context from it.
    pub fn from_user_data(data: Option<&Value>) -> Result<Self, ContextError> {
        let fields = match data {
            None | Some(Value::Null) => return Err(ContextError::Missing),
            Some(Value::Object(fields)) => fields,
            Some(_) => return Err(ContextError::NotAnObject),
        };

        let path = string_field(fields, "path")?;
        let route_path = string_field(fields, "route_path")?;

        let raw_data = match fields.get("route_data") {
            Some(Value::Object(raw)) => raw,
            Some(_) => {
                return Err(ContextError::WrongType {
                    field: "route_data",
                    expected: "an object",
                })
            }
            None => return Err(ContextError::MissingField("route_data")),
        };
        let route_data = raw_data
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => Ok((key.clone(), text.clone())),
                _ => Err(ContextError::RouteDataValue(key.clone())),
            })
            .collect::<Result<RouteData, _>>()?;

        let extra = fields
            .iter()
            .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            path,
            route_path,
            route_data,
            extra,
        })
    }

    /// JSON form stored on the transport: reserved fields plus flattened extras.
    pub fn to_user_data(&self) -> Value {
        let mut fields = self.extra.clone();
        fields.insert("path".into(), Value::String(self.path.clone()));
        fields.insert("route_path".into(), Value::String(self.route_path.clone()));
        fields.insert(
            "route_data".into(),
            Value::Object(
                self.route_data
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        Value::Object(fields)
    }
}

fn string_field(fields: &Map<String, Value>, field: &'static str) -> Result<String, ContextError> {
    match fields.get(field) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(ContextError::WrongType {
            field,
            expected: "a string",
        }),
        None => Err(ContextError::MissingField(field)),
    }
}
