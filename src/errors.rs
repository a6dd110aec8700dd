//! Start-up (registration) errors.
//!
//! Everything in here is raised while route tables and handler bindings are
//! being assembled, before the first connection is accepted. None of these
//! are recoverable: the process is expected to refuse to start.

use thiserror::Error;

/// A route table or handler binding could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The route pattern text is malformed.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Two patterns share a literal path but name their placeholders differently.
    #[error("route conflict: {left:?} declares {{{left_vars}}} but {right:?} declares {{{right_vars}}}")]
    RouteConflict {
        left: String,
        left_vars: String,
        right: String,
        right_vars: String,
    },

    /// A literal set contains a constant outside {int, bool, str, bytes, enum member, null}.
    #[error("literal member {member} is not an int, bool, str, bytes, enum member or null")]
    InvalidLiteral { member: String },

    /// A literal refers to an enum member that does not exist.
    #[error("enum {enum_name} has no member {member:?}")]
    UnknownEnumMember { enum_name: String, member: String },

    /// A parameter name is empty.
    #[error("{owner}: parameter names must not be empty")]
    EmptyParameterName { owner: String },

    /// The same parameter name appears twice in one binding.
    #[error("{owner}: parameter {param:?} is declared more than once")]
    DuplicateParameter { owner: String, param: String },

    /// A declared default does not satisfy the parameter's own type.
    #[error("{owner}: default for parameter {param:?} does not fit its type: {reason}")]
    InvalidDefault {
        owner: String,
        param: String,
        reason: String,
    },

    /// A composite type was declared without any member types.
    #[error("{owner}: parameter {param:?} declares an empty union")]
    EmptyUnion { owner: String, param: String },
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
