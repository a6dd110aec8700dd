//! Parameter resolution for one handler (or dependency) binding.
//!
//! # Lookup order for data parameters
//! 1. the payload's `data` object
//! 2. a top-level payload field
//! 3. the connection's route data
//! 4. the connection's extra fields
//!
//! A parameter found nowhere, or whose value reads as "no value", falls back
//! to its default; without a default it is left out of [`Args`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tower::BoxError;

use crate::errors::panic_message;
use crate::scope::cache::{CacheEntry, ResolutionCache};
use crate::scope::coerce::{coerce, CoerceError};
use crate::scope::dependency::Dependency;
use crate::scope::types::{Binding, BoolTokens, Param, ParamSource, ParamType};
use crate::scope::value::{Args, Bound, DepValue, Payload};
use crate::socket::context::ConnectionContext;
use crate::socket::transport::ConnectionHandle;

/// Payload field searched first for named parameters.
pub const CONTAINER_KEY: &str = "data";

/// Everything a binding can draw values from during one dispatch cycle.
pub struct ResolveContext<'a> {
    pub payload: &'a Arc<Payload>,
    pub connection: &'a ConnectionContext,
    pub handle: &'a ConnectionHandle,
    pub tokens: &'a BoolTokens,
}

/// A parameter could not be resolved.
#[derive(Debug, Error)]
#[error("parameter {param:?}: {kind}")]
pub struct ScopeError {
    pub param: String,
    pub kind: ScopeErrorKind,
}

#[derive(Debug, Error)]
pub enum ScopeErrorKind {
    #[error(transparent)]
    Coerce(#[from] CoerceError),

    #[error("{type_name} must be read from an object, found {container}")]
    EnumContainer { type_name: String, container: Value },

    #[error("default {default} is not a recognised {type_name}")]
    UnreadableDefault { type_name: String, default: Value },

    #[error("dependency {dependency:?} failed: {error}")]
    Dependency { dependency: String, error: BoxError },

    #[error("dependency {dependency:?} panicked: {message}")]
    Panicked { dependency: String, message: String },

    #[error("in dependency {dependency:?}: {inner}")]
    Nested {
        dependency: String,
        inner: Box<ScopeError>,
    },
}

impl ScopeError {
    fn new(param: &str, kind: impl Into<ScopeErrorKind>) -> Self {
        Self {
            param: param.to_string(),
            kind: kind.into(),
        }
    }
}

/// Resolve every parameter of `binding`, left to right.
///
/// Stops at the first parameter that fails; earlier results (including cached
/// dependencies and their pending releases) stay in `cache`.
pub fn resolve<'a>(
    binding: &'a Binding,
    ctx: &'a ResolveContext<'a>,
    cache: &'a mut ResolutionCache,
) -> BoxFuture<'a, Result<Args, ScopeError>> {
    async move {
        let mut args = Args::new();
        for param in binding.params() {
            let name = param.name();
            match param.source() {
                ParamSource::Message => args.insert(name, Bound::Message(Arc::clone(ctx.payload))),
                ParamSource::Connection => args.insert(name, Bound::Connection(ctx.handle.clone())),
                ParamSource::Depends(dependency) => {
                    let value = resolve_dependency(name, dependency, ctx, cache).await?;
                    args.insert(name, Bound::Dependency(value));
                }
                ParamSource::Data(ty) => {
                    if let Some(value) = resolve_data(param, ty, ctx)? {
                        args.insert(name, value);
                    } else {
                        tracing::trace!(owner = binding.owner(), param = name, "Parameter resolved to no value");
                    }
                }
            }
        }
        Ok(args)
    }
    .boxed()
}

async fn resolve_dependency(
    param: &str,
    dependency: &Dependency,
    ctx: &ResolveContext<'_>,
    cache: &mut ResolutionCache,
) -> Result<DepValue, ScopeError> {
    if dependency.caches() {
        if let Some(entry) = cache.get(dependency.id()) {
            tracing::trace!(dependency = dependency.name(), "Dependency served from cycle cache");
            return Ok(Arc::clone(&entry.value));
        }
    }

    let dep_args = resolve(dependency.binding(), ctx, cache)
        .await
        .map_err(|inner| {
            ScopeError::new(
                param,
                ScopeErrorKind::Nested {
                    dependency: dependency.name().to_string(),
                    inner: Box::new(inner),
                },
            )
        })?;

    let acquired = AssertUnwindSafe(async move { dependency.acquire(dep_args).await })
        .catch_unwind()
        .await;

    let (value, release) = match acquired {
        Ok(Ok(acquired)) => acquired,
        Ok(Err(error)) => {
            return Err(ScopeError::new(
                param,
                ScopeErrorKind::Dependency {
                    dependency: dependency.name().to_string(),
                    error,
                },
            ))
        }
        Err(panic) => {
            return Err(ScopeError::new(
                param,
                ScopeErrorKind::Panicked {
                    dependency: dependency.name().to_string(),
                    message: panic_message(panic.as_ref()),
                },
            ))
        }
    };

    tracing::debug!(
        dependency = dependency.name(),
        shape = ?dependency.shape(),
        cached = dependency.caches(),
        "Resolved dependency"
    );

    if let Some(release) = release {
        cache.defer_release(dependency.name(), release);
    }
    cache.insert(
        dependency.id(),
        CacheEntry {
            value: Arc::clone(&value),
            type_name: dependency.type_name(),
        },
    );
    Ok(value)
}

fn resolve_data(param: &Param, ty: &ParamType, ctx: &ResolveContext<'_>) -> Result<Option<Bound>, ScopeError> {
    let raw = locate(param.name(), ty, ctx).map_err(|kind| ScopeError::new(param.name(), kind))?;
    let resolved = match raw {
        Some(raw) => coerce(ty, &raw, ctx.tokens).map_err(|e| ScopeError::new(param.name(), e))?,
        None => None,
    };
    match resolved {
        Some(value) => Ok(Some(value)),
        None => default_of(param, ty, ctx.tokens),
    }
}

fn default_of(param: &Param, ty: &ParamType, tokens: &BoolTokens) -> Result<Option<Bound>, ScopeError> {
    if let Some(default) = param.default_value() {
        return Ok(Some(default.clone()));
    }
    let Some(raw) = param.token_default() else {
        return Ok(None);
    };
    match coerce(ty, raw, tokens) {
        Ok(Some(value)) => Ok(Some(value)),
        Ok(None) => Err(ScopeError::new(
            param.name(),
            ScopeErrorKind::UnreadableDefault {
                type_name: ty.to_string(),
                default: raw.clone(),
            },
        )),
        Err(e) => Err(ScopeError::new(param.name(), e)),
    }
}

fn locate(name: &str, ty: &ParamType, ctx: &ResolveContext<'_>) -> Result<Option<Value>, ScopeErrorKind> {
    match ctx.payload.get(CONTAINER_KEY) {
        Some(Value::Object(container)) => {
            if let Some(value) = container.get(name) {
                return Ok(Some(value.clone()));
            }
        }
        Some(other) => {
            if ty.reads_enum() {
                return Err(ScopeErrorKind::EnumContainer {
                    type_name: ty.to_string(),
                    container: other.clone(),
                });
            }
        }
        None => {}
    }

    if let Some(value) = ctx.payload.get(name) {
        return Ok(Some(value.clone()));
    }
    if let Some(value) = ctx.connection.route_data.get(name) {
        return Ok(Some(Value::String(value.clone())));
    }
    Ok(ctx.connection.extra.get(name).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::dependency::Scoped;
    use crate::scope::types::{EnumSpec, LiteralSet};
    use crate::socket::testing::{context_for, RecordingTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        payload: Arc<Payload>,
        context: ConnectionContext,
        handle: ConnectionHandle,
        tokens: BoolTokens,
    }

    impl Fixture {
        fn new(payload: Value) -> Self {
            let mut context = context_for("/boards/7", "/boards/{board_id}", &[("board_id", "7")]);
            context.extra.insert("user".into(), json!("ada"));
            let transport = RecordingTransport::new(Some(context.to_user_data()));
            Self {
                payload: Arc::new(Payload::new(payload.as_object().cloned().unwrap_or_default())),
                context,
                handle: transport.handle(),
                tokens: BoolTokens::default(),
            }
        }

        fn ctx(&self) -> ResolveContext<'_> {
            ResolveContext {
                payload: &self.payload,
                connection: &self.context,
                handle: &self.handle,
                tokens: &self.tokens,
            }
        }
    }

    async fn run(binding: &Binding, fixture: &Fixture) -> Result<Args, ScopeError> {
        let ctx = fixture.ctx();
        let mut cache = ResolutionCache::new();
        resolve(binding, &ctx, &mut cache).await
    }

    #[tokio::test]
    async fn test_lookup_precedence() {
        let binding = Binding::new(
            "h",
            vec![
                Param::new("a", ParamType::Str),
                Param::new("board_id", ParamType::Int),
                Param::new("user", ParamType::Str),
                Param::new("missing", ParamType::Str),
            ],
        )
        .unwrap();
        let fixture = Fixture::new(json!({
            "event": "x",
            "a": "top",
            "data": {"a": "nested"},
        }));

        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<String>("a").as_deref(), Some("nested"));
        assert_eq!(args.get::<i64>("board_id"), Some(7));
        assert_eq!(args.get::<String>("user").as_deref(), Some("ada"));
        assert!(!args.contains("missing"));
    }

    #[tokio::test]
    async fn test_payload_field_shadows_route_data() {
        let binding = Binding::new("h", vec![Param::new("board_id", ParamType::Int)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x", "board_id": "9"}));
        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<i64>("board_id"), Some(9));
    }

    #[tokio::test]
    async fn test_unknown_bool_token_uses_default() {
        let binding = Binding::new(
            "h",
            vec![
                Param::new("flag", ParamType::Bool).default(true),
                Param::new("other", ParamType::Bool),
            ],
        )
        .unwrap();
        let fixture = Fixture::new(json!({"event": "x", "flag": "maybe", "other": "maybe"}));
        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<bool>("flag"), Some(true));
        assert!(!args.contains("other"));
    }

    #[tokio::test]
    async fn test_coercion_failure_names_parameter() {
        let binding = Binding::new("h", vec![Param::new("count", ParamType::Int)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x", "count": "abc"}));
        let err = run(&binding, &fixture).await.unwrap_err();
        assert_eq!(err.param, "count");
        assert!(matches!(err.kind, ScopeErrorKind::Coerce(_)));
        assert!(err.to_string().contains("invalid digit found in string"));
    }

    #[tokio::test]
    async fn test_enum_requires_object_container() {
        let status = EnumSpec::new("Status", [("OPEN", "open"), ("DONE", "done")]);
        let binding = Binding::new("h", vec![Param::new("status", ParamType::Enum(status))]).unwrap();

        let fixture = Fixture::new(json!({"event": "x", "data": {"status": "done"}}));
        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<String>("status").as_deref(), Some("DONE"));

        let fixture = Fixture::new(json!({"event": "x", "data": "done"}));
        let err = run(&binding, &fixture).await.unwrap_err();
        assert!(matches!(err.kind, ScopeErrorKind::EnumContainer { .. }));
        assert!(err.to_string().contains("\"status\""));
    }

    #[tokio::test]
    async fn test_enum_in_union_or_literal_requires_object_container() {
        let status = EnumSpec::new("Status", [("OPEN", "open"), ("DONE", "done")]);
        let member = LiteralSet::from_values([]).unwrap().with_member(&status, "OPEN").unwrap();
        let either = ParamType::union([ParamType::Enum(status), ParamType::Int]);

        for ty in [either.clone(), ParamType::Literal(member)] {
            let binding = Binding::new("h", vec![Param::new("status", ty)]).unwrap();
            let fixture = Fixture::new(json!({"event": "x", "data": "oops", "status": "open"}));
            let err = run(&binding, &fixture).await.unwrap_err();
            assert!(matches!(err.kind, ScopeErrorKind::EnumContainer { .. }));
        }

        let binding = Binding::new("h", vec![Param::new("status", either)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x", "data": {"status": "open"}}));
        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<String>("status").as_deref(), Some("OPEN"));

        // Scalar containers only matter for enum readers.
        let binding = Binding::new("h", vec![Param::new("count", ParamType::Int)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x", "data": "oops", "count": 3}));
        assert_eq!(run(&binding, &fixture).await.unwrap().get::<i64>("count"), Some(3));
    }

    #[tokio::test]
    async fn test_text_default_is_read_with_configured_tokens() {
        let binding = Binding::new("h", vec![Param::new("flag", ParamType::Bool).default("si")]).unwrap();

        let mut fixture = Fixture::new(json!({"event": "x"}));
        fixture.tokens = BoolTokens::new(["si"], ["no"]);
        assert_eq!(run(&binding, &fixture).await.unwrap().get::<bool>("flag"), Some(true));

        let fixture = Fixture::new(json!({"event": "x"}));
        let err = run(&binding, &fixture).await.unwrap_err();
        assert_eq!(err.param, "flag");
        assert!(matches!(err.kind, ScopeErrorKind::UnreadableDefault { .. }));
    }

    #[tokio::test]
    async fn test_literal_and_framework_params() {
        let mode = LiteralSet::from_values([json!("fast"), json!("safe")]).unwrap();
        let binding = Binding::new(
            "h",
            vec![
                Param::new("mode", ParamType::Literal(mode)),
                Param::message("msg"),
                Param::connection("conn"),
            ],
        )
        .unwrap();

        let fixture = Fixture::new(json!({"event": "x", "mode": "safe"}));
        let args = run(&binding, &fixture).await.unwrap();
        assert_eq!(args.get::<String>("mode").as_deref(), Some("safe"));
        assert_eq!(
            args.message("msg").and_then(|m| m.get("event").cloned()),
            Some(json!("x"))
        );
        assert!(args.connection("conn").is_some());

        let fixture = Fixture::new(json!({"event": "x", "mode": "slow"}));
        let err = run(&binding, &fixture).await.unwrap_err();
        assert!(err.to_string().contains(r#"("fast", "safe")"#));
    }

    #[tokio::test]
    async fn test_cached_dependency_runs_once_per_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let dep = Dependency::sync("counter", vec![], move |_| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        })
        .unwrap();

        let binding = Binding::new(
            "h",
            vec![Param::depends("a", dep.clone()), Param::depends("b", dep.clone())],
        )
        .unwrap();
        let uncached = Binding::new(
            "h2",
            vec![
                Param::depends("a", dep.clone().use_cache(false)),
                Param::depends("b", dep.use_cache(false)),
            ],
        )
        .unwrap();

        let fixture = Fixture::new(json!({"event": "x"}));
        let ctx = fixture.ctx();

        let mut cache = ResolutionCache::new();
        let args = resolve(&binding, &ctx, &mut cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(args.dep::<usize>("a"), args.dep::<usize>("b"));
        assert_eq!(cache.len(), 1);

        let mut cache = ResolutionCache::new();
        resolve(&uncached, &ctx, &mut cache).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_nested_dependency_sees_payload_and_defers_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);

        let board = Dependency::scoped_async(
            "board",
            vec![Param::new("board_id", ParamType::Int)],
            move |args: Args| {
                let counter = Arc::clone(&counter);
                async move {
                    let id = args.get::<i64>("board_id").ok_or("no board id")?;
                    Ok::<_, BoxError>(Scoped::with_release(format!("board-{id}"), move || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }))
                }
            },
        )
        .unwrap();
        let title = Dependency::sync("title", vec![Param::depends("board", board)], |args| {
            let board = args.dep::<String>("board").ok_or("board missing")?;
            Ok(board.to_uppercase())
        })
        .unwrap();

        let binding = Binding::new("h", vec![Param::depends("title", title)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x"}));
        let ctx = fixture.ctx();
        let mut cache = ResolutionCache::new();

        let args = resolve(&binding, &ctx, &mut cache).await.unwrap();
        assert_eq!(args.dep::<String>("title").as_deref().map(String::as_str), Some("BOARD-7"));
        assert_eq!(cache.pending_releases(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        cache.teardown().await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_failure_reports_outer_parameter() {
        let inner = Dependency::sync("needs_count", vec![Param::new("count", ParamType::Int)], |_| Ok(()))
            .unwrap();
        let binding = Binding::new("h", vec![Param::depends("thing", inner)]).unwrap();
        let fixture = Fixture::new(json!({"event": "x", "count": "nope"}));

        let err = run(&binding, &fixture).await.unwrap_err();
        assert_eq!(err.param, "thing");
        assert!(matches!(err.kind, ScopeErrorKind::Nested { .. }));
        assert!(err.to_string().contains(r#"in dependency "needs_count": parameter "count""#));
    }

    #[tokio::test]
    async fn test_dependency_error_and_panic_are_scope_errors() {
        let failing = Dependency::sync("failing", vec![], |_| -> Result<(), BoxError> {
            Err("database unavailable".into())
        })
        .unwrap();
        let panicking = Dependency::sync("panicking", vec![], |_| -> Result<(), BoxError> {
            panic!("boom")
        })
        .unwrap();
        let fixture = Fixture::new(json!({"event": "x"}));

        let binding = Binding::new("h", vec![Param::depends("f", failing)]).unwrap();
        let err = run(&binding, &fixture).await.unwrap_err();
        assert!(err.to_string().contains("database unavailable"));

        let binding = Binding::new("h", vec![Param::depends("p", panicking)]).unwrap();
        let err = run(&binding, &fixture).await.unwrap_err();
        assert!(matches!(err.kind, ScopeErrorKind::Panicked { .. }));
    }
}
