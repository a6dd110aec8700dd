//! Declared parameter types and handler bindings.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::RegistrationError;
use crate::scope::coerce::coerce;
use crate::scope::dependency::Dependency;
use crate::scope::model::ModelSpec;
use crate::scope::value::Bound;

/// Declared type of a data-bearing parameter.
#[derive(Debug, Clone)]
pub enum ParamType {
    Int,
    Float,
    Str,
    Bytes,
    Bool,
    /// Any JSON value, passed through untouched.
    Json,
    Enum(EnumSpec),
    Literal(LiteralSet),
    /// Candidate types tried left to right; the first success wins.
    Union(Vec<ParamType>),
    Model(ModelSpec),
}

impl ParamType {
    pub fn union(members: impl IntoIterator<Item = ParamType>) -> Self {
        Self::Union(members.into_iter().collect())
    }

    /// Whether an enum can be read through this type, directly or as a union member.
    pub(crate) fn reads_enum(&self) -> bool {
        match self {
            Self::Enum(_) => true,
            Self::Literal(set) => set.members.iter().any(|m| matches!(m, LiteralValue::Member { .. })),
            Self::Union(members) => members.iter().any(ParamType::reads_enum),
            _ => false,
        }
    }

    /// Whether text can be read as a boolean token through this type.
    pub(crate) fn reads_bool(&self) -> bool {
        match self {
            Self::Bool => true,
            Self::Union(members) => members.iter().any(ParamType::reads_bool),
            _ => false,
        }
    }

    pub(crate) fn validate(&self, owner: &str, param: &str) -> Result<(), RegistrationError> {
        match self {
            Self::Union(members) if members.is_empty() => Err(RegistrationError::EmptyUnion {
                owner: owner.to_string(),
                param: param.to_string(),
            }),
            Self::Union(members) => members.iter().try_for_each(|m| m.validate(owner, param)),
            Self::Model(model) => model.validate_fields(owner),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Str => f.write_str("str"),
            Self::Bytes => f.write_str("bytes"),
            Self::Bool => f.write_str("bool"),
            Self::Json => f.write_str("json"),
            Self::Enum(spec) => f.write_str(spec.name()),
            Self::Literal(set) => write!(f, "Literal{set}"),
            Self::Union(members) => {
                let names: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "Union[{}]", names.join(", "))
            }
            Self::Model(model) => f.write_str(model.name()),
        }
    }
}

#[derive(Debug)]
struct EnumInner {
    name: String,
    members: Vec<(String, Value)>,
}

/// A closed set of named members, each carrying a value.
///
/// Raw input is matched against member names first, then member values.
#[derive(Debug, Clone)]
pub struct EnumSpec {
    inner: Arc<EnumInner>,
}

impl EnumSpec {
    pub fn new<N, V>(name: impl Into<String>, members: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
    {
        Self {
            inner: Arc::new(EnumInner {
                name: name.into(),
                members: members
                    .into_iter()
                    .map(|(n, v)| (n.into(), v.into()))
                    .collect(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner.members.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn member_value(&self, name: &str) -> Option<&Value> {
        self.members().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// One constant of a [`LiteralSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Member {
        enum_name: String,
        name: String,
        value: Value,
    },
    Null,
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Self::Member { enum_name, name, .. } => write!(f, "{enum_name}.{name}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Ordered set of allowed constants.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralSet {
    members: Vec<LiteralValue>,
}

impl LiteralSet {
    /// Build a literal set from JSON constants.
    ///
    /// Floats, arrays and objects are rejected: they are not valid literal members.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self, RegistrationError> {
        let members = values
            .into_iter()
            .map(|value| match value {
                Value::Null => Ok(LiteralValue::Null),
                Value::Bool(b) => Ok(LiteralValue::Bool(b)),
                Value::String(s) => Ok(LiteralValue::Str(s)),
                Value::Number(ref n) => n
                    .as_i64()
                    .map(LiteralValue::Int)
                    .ok_or_else(|| RegistrationError::InvalidLiteral {
                        member: value.to_string(),
                    }),
                other => Err(RegistrationError::InvalidLiteral {
                    member: other.to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { members })
    }

    /// Append a bytes constant.
    pub fn with_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.members.push(LiteralValue::Bytes(bytes.into()));
        self
    }

    /// Append an enum member constant.
    pub fn with_member(mut self, spec: &EnumSpec, name: &str) -> Result<Self, RegistrationError> {
        let value = spec
            .member_value(name)
            .ok_or_else(|| RegistrationError::UnknownEnumMember {
                enum_name: spec.name().to_string(),
                member: name.to_string(),
            })?
            .clone();
        self.members.push(LiteralValue::Member {
            enum_name: spec.name().to_string(),
            name: name.to_string(),
            value,
        });
        Ok(self)
    }

    pub fn members(&self) -> &[LiteralValue] {
        &self.members
    }

    pub(crate) fn has_ints(&self) -> bool {
        self.members.iter().any(|m| matches!(m, LiteralValue::Int(_)))
    }
}

impl fmt::Display for LiteralSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.members.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Case-insensitive token sets used to read booleans from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolTokens {
    truthy: HashSet<String>,
    falsy: HashSet<String>,
}

impl BoolTokens {
    pub fn new<T, F>(truthy: impl IntoIterator<Item = T>, falsy: impl IntoIterator<Item = F>) -> Self
    where
        T: AsRef<str>,
        F: AsRef<str>,
    {
        Self {
            truthy: truthy.into_iter().map(|t| t.as_ref().to_lowercase()).collect(),
            falsy: falsy.into_iter().map(|t| t.as_ref().to_lowercase()).collect(),
        }
    }

    /// `Some(true)` / `Some(false)` for a recognised token, `None` otherwise.
    pub fn read(&self, token: &str) -> Option<bool> {
        let token = token.trim().to_lowercase();
        if self.truthy.contains(&token) {
            Some(true)
        } else if self.falsy.contains(&token) {
            Some(false)
        } else {
            None
        }
    }
}

impl Default for BoolTokens {
    fn default() -> Self {
        Self::new(
            ["true", "1", "yes", "on", "y", "t"],
            ["false", "0", "no", "off", "n", "f"],
        )
    }
}

/// Where a parameter's value comes from.
#[derive(Debug, Clone)]
pub enum ParamSource {
    /// Located by name in the payload or connection context, then coerced.
    Data(ParamType),
    /// The raw inbound payload.
    Message,
    /// The connection handle.
    Connection,
    /// The result of another callable, resolved recursively.
    Depends(Dependency),
}

/// One declared handler parameter.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    source: ParamSource,
    raw_default: Option<Value>,
    default: Option<Bound>,
}

impl Param {
    /// A data-bearing parameter of type `ty`.
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self::with_source(name, ParamSource::Data(ty))
    }

    pub fn message(name: impl Into<String>) -> Self {
        Self::with_source(name, ParamSource::Message)
    }

    pub fn connection(name: impl Into<String>) -> Self {
        Self::with_source(name, ParamSource::Connection)
    }

    pub fn depends(name: impl Into<String>, dependency: Dependency) -> Self {
        Self::with_source(name, ParamSource::Depends(dependency))
    }

    /// Value used when the parameter cannot be located or resolves to no value.
    ///
    /// Checked against the declared type when the binding is built. Text that
    /// the built-in bool tokens do not read is kept for a bool-reading type and
    /// read with the configured tokens at bind time.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.raw_default = Some(value.into());
        self
    }

    fn with_source(name: impl Into<String>, source: ParamSource) -> Self {
        Self {
            name: name.into(),
            source,
            raw_default: None,
            default: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ParamSource {
        &self.source
    }

    pub(crate) fn default_value(&self) -> Option<&Bound> {
        self.default.as_ref()
    }

    /// A declared default left for the configured bool tokens to read.
    pub(crate) fn token_default(&self) -> Option<&Value> {
        match (&self.default, &self.raw_default) {
            (None, Some(raw)) => Some(raw),
            _ => None,
        }
    }
}

/// The validated parameter list of a handler or dependency.
#[derive(Debug, Clone)]
pub struct Binding {
    owner: String,
    params: Vec<Param>,
}

impl Binding {
    /// Validate `params` and coerce their declared defaults.
    pub fn new(owner: impl Into<String>, params: Vec<Param>) -> Result<Self, RegistrationError> {
        let owner = owner.into();
        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(params.len());

        for mut param in params {
            if param.name.is_empty() {
                return Err(RegistrationError::EmptyParameterName { owner });
            }
            if !seen.insert(param.name.clone()) {
                return Err(RegistrationError::DuplicateParameter {
                    owner,
                    param: param.name,
                });
            }

            if let ParamSource::Data(ty) = &param.source {
                ty.validate(&owner, &param.name)?;
            }

            if let Some(raw) = &param.raw_default {
                let invalid = |reason: String| RegistrationError::InvalidDefault {
                    owner: owner.clone(),
                    param: param.name.clone(),
                    reason,
                };
                param.default = match &param.source {
                    ParamSource::Data(ty) => match coerce(ty, raw, &BoolTokens::default()) {
                        Ok(Some(bound)) => Some(bound),
                        // Read at bind time with the configured tokens.
                        Ok(None) if raw.is_string() && ty.reads_bool() => None,
                        Ok(None) => return Err(invalid(format!("{raw} is not a {ty}"))),
                        Err(e) => return Err(invalid(e.to_string())),
                    },
                    _ => return Err(invalid("only data parameters take defaults".into())),
                };
            }
            validated.push(param);
        }

        Ok(Self {
            owner,
            params: validated,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}
