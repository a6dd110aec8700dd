//! Raw JSON → declared type conversion.
//!
//! `Ok(None)` means "no value" (an unrecognised boolean token); it is not a
//! failure and lets the resolver fall back to the parameter's default.

use serde_json::Value;
use thiserror::Error;

use crate::scope::model::ModelErrors;
use crate::scope::types::{BoolTokens, EnumSpec, LiteralSet, LiteralValue, ParamType};
use crate::scope::value::{Bound, EnumMember};

/// A raw value could not be converted to its declared type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoerceError {
    #[error("cannot convert {input} to {expected}: {reason}")]
    Conversion {
        expected: String,
        input: Value,
        reason: String,
    },

    #[error("{input} is not one of the allowed literals {allowed}")]
    Literal { input: Value, allowed: String },

    #[error("{input} matches none of {types} ({})", .attempts.join("; "))]
    Union {
        input: Value,
        types: String,
        attempts: Vec<String>,
    },

    #[error(transparent)]
    Model(ModelErrors),
}

impl CoerceError {
    /// Stable error kind, used in model field errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conversion { .. } => "conversion",
            Self::Literal { .. } => "literal",
            Self::Union { .. } => "union",
            Self::Model(_) => "model",
        }
    }
}

fn conversion(expected: impl Into<String>, input: &Value, reason: impl Into<String>) -> CoerceError {
    CoerceError::Conversion {
        expected: expected.into(),
        input: input.clone(),
        reason: reason.into(),
    }
}

/// Convert `raw` to the declared type.
pub fn coerce(ty: &ParamType, raw: &Value, tokens: &BoolTokens) -> Result<Option<Bound>, CoerceError> {
    match ty {
        ParamType::Int => to_int(raw).map(|i| Some(Bound::Int(i))),
        ParamType::Float => to_float(raw).map(|f| Some(Bound::Float(f))),
        ParamType::Str => Ok(Some(Bound::Str(to_text(raw)))),
        ParamType::Bytes => to_bytes(raw).map(|b| Some(Bound::Bytes(b))),
        ParamType::Bool => Ok(to_bool(raw, tokens).map(Bound::Bool)),
        ParamType::Json => Ok(Some(Bound::Json(raw.clone()))),
        ParamType::Enum(spec) => to_enum(spec, raw).map(|m| Some(Bound::Enum(m))),
        ParamType::Literal(set) => to_literal(set, raw).map(Some),
        ParamType::Union(members) => {
            let mut attempts = Vec::with_capacity(members.len());
            for member in members {
                match coerce(member, raw, tokens) {
                    Ok(value) => return Ok(value),
                    Err(e) => attempts.push(format!("{member}: {e}")),
                }
            }
            Err(CoerceError::Union {
                input: raw.clone(),
                types: ty.to_string(),
                attempts,
            })
        }
        ParamType::Model(model) => model
            .validate(raw, tokens)
            .map(|fields| Some(Bound::Model(fields)))
            .map_err(CoerceError::Model),
    }
}

const I64_UPPER_EXCLUSIVE: f64 = 9_223_372_036_854_775_808.0;

fn to_int(raw: &Value) -> Result<i64, CoerceError> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                let truncated = f.trunc();
                // i64::MAX rounds up to 2^63 as a float, so the upper bound is exclusive.
                if truncated >= i64::MIN as f64 && truncated < I64_UPPER_EXCLUSIVE {
                    Ok(truncated as i64)
                } else {
                    Err(conversion("int", raw, "number out of range"))
                }
            } else {
                Err(conversion("int", raw, "number out of range"))
            }
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| conversion("int", raw, e.to_string())),
        _ => Err(conversion("int", raw, "unsupported input")),
    }
}

fn to_float(raw: &Value) -> Result<f64, CoerceError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| conversion("float", raw, "number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| conversion("float", raw, e.to_string())),
        _ => Err(conversion("float", raw, "unsupported input")),
    }
}

fn to_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_bytes(raw: &Value) -> Result<Vec<u8>, CoerceError> {
    match raw {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| conversion("bytes", raw, format!("{item} is not a byte (0..=255)")))
            })
            .collect(),
        _ => Err(conversion("bytes", raw, "unsupported input")),
    }
}

fn to_bool(raw: &Value, tokens: &BoolTokens) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => tokens.read(s),
        Value::Number(n) => tokens.read(&n.to_string()),
        _ => None,
    }
}

fn to_enum(spec: &EnumSpec, raw: &Value) -> Result<EnumMember, CoerceError> {
    let by_name = raw
        .as_str()
        .and_then(|s| spec.members().find(|(name, _)| *name == s));
    let found = by_name.or_else(|| spec.members().find(|(_, value)| loosely_equal(value, raw)));

    found
        .map(|(name, value)| EnumMember {
            enum_name: spec.name().to_string(),
            name: name.to_string(),
            value: value.clone(),
        })
        .ok_or_else(|| conversion(spec.name(), raw, format!("not a valid {} member", spec.name())))
}

/// Strict equality, plus digit strings compared against integer members.
fn loosely_equal(member: &Value, raw: &Value) -> bool {
    if member == raw {
        return true;
    }
    match (member, raw) {
        (Value::Number(n), Value::String(s)) => match (n.as_i64(), s.trim().parse::<i64>()) {
            (Some(expected), Ok(actual)) => expected == actual,
            _ => false,
        },
        _ => false,
    }
}

fn to_literal(set: &LiteralSet, raw: &Value) -> Result<Bound, CoerceError> {
    let as_int = match raw {
        Value::String(s) if set.has_ints() => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    for member in set.members() {
        let hit = match member {
            LiteralValue::Int(expected) => as_int == Some(*expected),
            LiteralValue::Bool(expected) => raw.as_bool() == Some(*expected),
            LiteralValue::Str(expected) => raw.as_str() == Some(expected.as_str()),
            LiteralValue::Bytes(expected) => raw.as_str().map(str::as_bytes) == Some(expected.as_slice()),
            LiteralValue::Member { name, value, .. } => {
                raw.as_str() == Some(name.as_str()) || value == raw
            }
            LiteralValue::Null => raw.is_null(),
        };
        if hit {
            return Ok(match member {
                LiteralValue::Int(i) => Bound::Int(*i),
                LiteralValue::Bool(b) => Bound::Bool(*b),
                LiteralValue::Str(s) => Bound::Str(s.clone()),
                LiteralValue::Bytes(b) => Bound::Bytes(b.clone()),
                LiteralValue::Member {
                    enum_name,
                    name,
                    value,
                } => Bound::Enum(EnumMember {
                    enum_name: enum_name.clone(),
                    name: name.clone(),
                    value: value.clone(),
                }),
                LiteralValue::Null => Bound::Null,
            });
        }
    }

    Err(CoerceError::Literal {
        input: raw.clone(),
        allowed: set.to_string(),
    })
}
