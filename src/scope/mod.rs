//! Parameter binding subsystem.
//!
//! # Data Flow
//! ```text
//! Binding (built at registration)
//!     → resolver.rs (locate each parameter, left to right)
//!     → coerce.rs / model.rs (raw JSON → declared type)
//!     → dependency.rs (recursive providers, results kept in cache.rs)
//!     → Args handed to the handler
//! ```
//!
//! # Design Decisions
//! - Bindings are explicit builder values, validated once at registration
//! - One `ResolutionCache` per dispatch cycle, torn down after the last handler
//! - "No value" is not an error: the parameter falls back to its default or is left out

pub mod cache;
pub mod coerce;
pub mod dependency;
pub mod model;
pub mod resolver;
pub mod types;
pub mod value;

pub use cache::ResolutionCache;
pub use coerce::{coerce, CoerceError};
pub use dependency::{Dependency, DependencyId, ProviderShape, Release, ReleaseFn, Scoped};
pub use model::{FieldError, ModelErrors, ModelSpec};
pub use resolver::{resolve, ResolveContext, ScopeError, ScopeErrorKind, CONTAINER_KEY};
pub use types::{Binding, BoolTokens, EnumSpec, LiteralSet, LiteralValue, Param, ParamSource, ParamType};
pub use value::{Args, Bound, DepValue, EnumMember, FromBound, Payload};
