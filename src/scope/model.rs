//! Structured (model) parameters validated field by field.
//!
//! Validation never stops at the first bad field: every problem is reported
//! with its location, kind and the offending input.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::RegistrationError;
use crate::scope::coerce::{coerce, CoerceError};
use crate::scope::types::{BoolTokens, ParamType};

#[derive(Debug, Clone)]
struct Field {
    name: String,
    ty: ParamType,
    required: bool,
    default: Option<Value>,
}

#[derive(Debug, Clone)]
struct ModelInner {
    name: String,
    fields: Vec<Field>,
}

/// Declared shape of a composite parameter.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    inner: Arc<ModelInner>,
}

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Path from the model root to the failing field.
    pub loc: Vec<String>,
    pub kind: &'static str,
    pub message: String,
    pub input: Value,
}

/// Every field-level problem found while validating one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelErrors {
    pub model: String,
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ModelErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 { "error" } else { "errors" };
        write!(f, "{} validation {noun} for {}", self.errors.len(), self.model)?;
        for error in &self.errors {
            let loc = if error.loc.is_empty() {
                "<root>".to_string()
            } else {
                error.loc.join(".")
            };
            write!(f, "\n  {loc}: {} [kind={}, input={}]", error.message, error.kind, error.input)?;
        }
        Ok(())
    }
}

impl std::error::Error for ModelErrors {}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                name: name.into(),
                fields: Vec::new(),
            }),
        }
    }

    /// A field that must be present.
    pub fn field(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.push(name.into(), ty, true, None)
    }

    /// A field that may be absent.
    pub fn optional(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.push(name.into(), ty, false, None)
    }

    /// A field filled with `default` when absent.
    pub fn with_default(self, name: impl Into<String>, ty: ParamType, default: impl Into<Value>) -> Self {
        self.push(name.into(), ty, false, Some(default.into()))
    }

    fn push(mut self, name: String, ty: ParamType, required: bool, default: Option<Value>) -> Self {
        Arc::make_mut(&mut self.inner).fields.push(Field {
            name,
            ty,
            required,
            default,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.inner.fields.iter().map(|f| f.name.as_str())
    }

    pub(crate) fn validate_fields(&self, owner: &str) -> Result<(), RegistrationError> {
        let label = format!("{owner} (model {})", self.name());
        let mut seen = std::collections::HashSet::new();
        for field in &self.inner.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(RegistrationError::DuplicateParameter {
                    owner: label,
                    param: field.name.clone(),
                });
            }
            field.ty.validate(&label, &field.name)?;
            if let Some(default) = &field.default {
                check_default(field, default).map_err(|reason| RegistrationError::InvalidDefault {
                    owner: label.clone(),
                    param: field.name.clone(),
                    reason,
                })?;
            }
        }
        Ok(())
    }

    /// Validate `raw` and return the coerced declared fields.
    pub fn validate(&self, raw: &Value, tokens: &BoolTokens) -> Result<Map<String, Value>, ModelErrors> {
        let Value::Object(object) = raw else {
            return Err(ModelErrors {
                model: self.name().to_string(),
                errors: vec![FieldError {
                    loc: Vec::new(),
                    kind: "model_type",
                    message: format!("expected an object for {}", self.name()),
                    input: raw.clone(),
                }],
            });
        };

        let mut out = Map::new();
        let mut errors = Vec::new();

        for field in &self.inner.fields {
            let Some(value) = object.get(&field.name) else {
                if let Some(default) = &field.default {
                    match coerce(&field.ty, default, tokens) {
                        Ok(Some(bound)) => {
                            out.insert(field.name.clone(), bound.to_json());
                        }
                        Ok(None) => errors.push(FieldError {
                            loc: vec![field.name.clone()],
                            kind: "default",
                            message: format!("default is not a recognised {}", field.ty),
                            input: default.clone(),
                        }),
                        Err(e) => errors.push(FieldError {
                            loc: vec![field.name.clone()],
                            kind: "default",
                            message: e.to_string(),
                            input: default.clone(),
                        }),
                    }
                } else if field.required {
                    errors.push(FieldError {
                        loc: vec![field.name.clone()],
                        kind: "missing",
                        message: "field required".into(),
                        input: raw.clone(),
                    });
                }
                continue;
            };

            match coerce(&field.ty, value, tokens) {
                Ok(Some(bound)) => {
                    out.insert(field.name.clone(), bound.to_json());
                }
                Ok(None) => errors.push(FieldError {
                    loc: vec![field.name.clone()],
                    kind: "unrecognised",
                    message: format!("value is not a recognised {}", field.ty),
                    input: value.clone(),
                }),
                Err(CoerceError::Model(nested)) => {
                    errors.extend(nested.errors.into_iter().map(|mut e| {
                        e.loc.insert(0, field.name.clone());
                        e
                    }));
                }
                Err(e) => errors.push(FieldError {
                    loc: vec![field.name.clone()],
                    kind: e.kind(),
                    message: e.to_string(),
                    input: value.clone(),
                }),
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(ModelErrors {
                model: self.name().to_string(),
                errors,
            })
        }
    }
}

/// A field default must coerce with the built-in tokens, unless it is text
/// left for the configured bool tokens to read.
fn check_default(field: &Field, default: &Value) -> Result<(), String> {
    match coerce(&field.ty, default, &BoolTokens::default()) {
        Ok(Some(_)) => Ok(()),
        Ok(None) if default.is_string() && field.ty.reads_bool() => Ok(()),
        Ok(None) => Err(format!("{default} is not a {}", field.ty)),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card() -> ModelSpec {
        let column = ModelSpec::new("Column").field("id", ParamType::Int);
        ModelSpec::new("Card")
            .field("title", ParamType::Str)
            .field("position", ParamType::Int)
            .optional("archived", ParamType::Bool)
            .with_default("color", ParamType::Str, "grey")
            .field("column", ParamType::Model(column))
    }

    #[test]
    fn test_valid_model_is_coerced() {
        let raw = json!({"title": "Ship", "position": "3", "column": {"id": "9"}, "extra": 1});
        let fields = card().validate(&raw, &BoolTokens::default()).unwrap();
        assert_eq!(
            Value::Object(fields),
            json!({"title": "Ship", "position": 3, "color": "grey", "column": {"id": 9}})
        );
    }

    #[test]
    fn test_every_field_error_is_collected() {
        let raw = json!({"position": "x", "archived": "perhaps", "column": {"id": []}});
        let err = card().validate(&raw, &BoolTokens::default()).unwrap_err();

        let locs: Vec<String> = err.errors.iter().map(|e| e.loc.join(".")).collect();
        assert_eq!(locs, ["title", "position", "archived", "column.id"]);

        let kinds: Vec<&str> = err.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ["missing", "conversion", "unrecognised", "conversion"]);
        assert_eq!(err.errors[1].input, json!("x"));
        assert!(err.to_string().starts_with("4 validation errors for Card"));
    }

    #[test]
    fn test_non_object_input() {
        let err = card().validate(&json!("nope"), &BoolTokens::default()).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].kind, "model_type");
    }

    #[test]
    fn test_field_defaults_are_checked_and_coerced() {
        let bad = ModelSpec::new("Card").with_default("position", ParamType::Int, "not-a-number");
        assert!(matches!(
            bad.validate_fields("handler"),
            Err(RegistrationError::InvalidDefault { .. })
        ));

        let spec = ModelSpec::new("Card")
            .with_default("position", ParamType::Int, "4")
            .with_default("pinned", ParamType::Bool, "si");
        assert!(spec.validate_fields("handler").is_ok());

        let tokens = BoolTokens::new(["si"], ["no"]);
        let fields = spec.validate(&json!({}), &tokens).unwrap();
        assert_eq!(Value::Object(fields), json!({"position": 4, "pinned": true}));

        let err = spec.validate(&json!({}), &BoolTokens::default()).unwrap_err();
        assert_eq!(err.errors[0].loc, ["pinned"]);
        assert_eq!(err.errors[0].kind, "default");
    }

    #[test]
    fn test_duplicate_fields_rejected_at_registration() {
        let spec = ModelSpec::new("M").field("a", ParamType::Int).field("a", ParamType::Str);
        assert!(spec.validate_fields("handler").is_err());
    }
}
