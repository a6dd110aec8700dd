//! Dependency descriptors: callables whose results are injected as parameters.
//!
//! # Shapes
//! - `sync` / `future`: the provider's return value is the parameter value
//! - `scoped` / `scoped_async`: the provider returns a [`Scoped`] value; its
//!   [`Release`] half runs once the dispatch cycle has finished
//!
//! A descriptor's identity is fixed when it is constructed and survives
//! `clone()` and [`Dependency::use_cache`], so every parameter declaring the
//! same provider shares one cache slot.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::BoxError;

use crate::errors::RegistrationError;
use crate::scope::types::{Binding, Param};
use crate::scope::value::{Args, DepValue};

static NEXT_DEPENDENCY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a dependency provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyId(u64);

impl DependencyId {
    fn next() -> Self {
        Self(NEXT_DEPENDENCY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep-{}", self.0)
    }
}

/// Tear-down half of a scoped resource.
#[async_trait]
pub trait Release: Send {
    async fn release(self: Box<Self>);
}

/// Adapter turning a closure into a [`Release`].
pub struct ReleaseFn<F>(pub F);

#[async_trait]
impl<F, Fut> Release for ReleaseFn<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    async fn release(self: Box<Self>) {
        (self.0)().await
    }
}

/// A value paired with the action that releases it.
pub struct Scoped<T> {
    value: T,
    release: Box<dyn Release>,
}

impl<T> Scoped<T> {
    pub fn new(value: T, release: impl Release + 'static) -> Self {
        Self {
            value,
            release: Box::new(release),
        }
    }

    /// Release with an async closure.
    pub fn with_release<F, Fut>(value: T, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(value, ReleaseFn(release))
    }

    pub fn into_parts(self) -> (T, Box<dyn Release>) {
        (self.value, self.release)
    }
}

/// Which constructor built a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderShape {
    Sync,
    Async,
    Scoped,
    ScopedAsync,
}

pub(crate) type Acquired = (DepValue, Option<Box<dyn Release>>);
type ProviderFn = dyn Fn(Args) -> BoxFuture<'static, Result<Acquired, BoxError>> + Send + Sync;

struct Provider {
    id: DependencyId,
    name: String,
    binding: Binding,
    shape: ProviderShape,
    type_name: &'static str,
    call: Box<ProviderFn>,
}

/// A parameter's dependency on another callable.
#[derive(Clone)]
pub struct Dependency {
    provider: Arc<Provider>,
    use_cache: bool,
}

impl Dependency {
    /// Plain synchronous provider.
    pub fn sync<T, F>(name: impl Into<String>, params: Vec<Param>, f: F) -> Result<Self, RegistrationError>
    where
        T: Any + Send + Sync,
        F: Fn(&Args) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::build(name, params, ProviderShape::Sync, type_name::<T>(), move |args| {
            let result = f(&args).map(|value| (Arc::new(value) as DepValue, None));
            async move { result }.boxed()
        })
    }

    /// Asynchronous provider.
    pub fn future<T, F, Fut>(name: impl Into<String>, params: Vec<Param>, f: F) -> Result<Self, RegistrationError>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self::build(name, params, ProviderShape::Async, type_name::<T>(), move |args| {
            f(args)
                .map(|result| result.map(|value| (Arc::new(value) as DepValue, None)))
                .boxed()
        })
    }

    /// Synchronous provider of a resource released at the end of the cycle.
    pub fn scoped<T, F>(name: impl Into<String>, params: Vec<Param>, f: F) -> Result<Self, RegistrationError>
    where
        T: Any + Send + Sync,
        F: Fn(&Args) -> Result<Scoped<T>, BoxError> + Send + Sync + 'static,
    {
        Self::build(name, params, ProviderShape::Scoped, type_name::<T>(), move |args| {
            let result = f(&args).map(split_scoped);
            async move { result }.boxed()
        })
    }

    /// Asynchronous provider of a resource released at the end of the cycle.
    pub fn scoped_async<T, F, Fut>(
        name: impl Into<String>,
        params: Vec<Param>,
        f: F,
    ) -> Result<Self, RegistrationError>
    where
        T: Any + Send + Sync,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Scoped<T>, BoxError>> + Send + 'static,
    {
        Self::build(name, params, ProviderShape::ScopedAsync, type_name::<T>(), move |args| {
            f(args).map(|result| result.map(split_scoped)).boxed()
        })
    }

    fn build<C>(
        name: impl Into<String>,
        params: Vec<Param>,
        shape: ProviderShape,
        type_name: &'static str,
        call: C,
    ) -> Result<Self, RegistrationError>
    where
        C: Fn(Args) -> BoxFuture<'static, Result<Acquired, BoxError>> + Send + Sync + 'static,
    {
        let name = name.into();
        let binding = Binding::new(format!("dependency {name}"), params)?;
        Ok(Self {
            provider: Arc::new(Provider {
                id: DependencyId::next(),
                name,
                binding,
                shape,
                type_name,
                call: Box::new(call),
            }),
            use_cache: true,
        })
    }

    /// Whether a cached value from earlier in the cycle may be reused (default `true`).
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn id(&self) -> DependencyId {
        self.provider.id
    }

    pub fn name(&self) -> &str {
        &self.provider.name
    }

    pub fn shape(&self) -> ProviderShape {
        self.provider.shape
    }

    /// Name of the type the provider produces.
    pub fn type_name(&self) -> &'static str {
        self.provider.type_name
    }

    pub fn caches(&self) -> bool {
        self.use_cache
    }

    pub fn binding(&self) -> &Binding {
        &self.provider.binding
    }

    pub(crate) fn acquire(&self, args: Args) -> BoxFuture<'static, Result<Acquired, BoxError>> {
        (self.provider.call)(args)
    }
}

fn split_scoped<T: Any + Send + Sync>(scoped: Scoped<T>) -> Acquired {
    let (value, release) = scoped.into_parts();
    (Arc::new(value) as DepValue, Some(release))
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.provider.id)
            .field("name", &self.provider.name)
            .field("shape", &self.provider.shape)
            .field("type", &self.provider.type_name)
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::types::ParamType;

    #[test]
    fn test_identity_survives_clone_and_cache_flag() {
        let dep = Dependency::sync("clock", vec![], |_| Ok(5_u8)).unwrap();
        let uncached = dep.clone().use_cache(false);
        assert_eq!(dep.id(), uncached.id());
        assert!(dep.caches());
        assert!(!uncached.caches());

        let other = Dependency::sync("clock", vec![], |_| Ok(5_u8)).unwrap();
        assert_ne!(dep.id(), other.id());
    }

    #[test]
    fn test_binding_errors_surface_at_construction() {
        let err = Dependency::sync(
            "dup",
            vec![Param::new("a", ParamType::Int), Param::new("a", ParamType::Int)],
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateParameter { .. }));
    }

    #[tokio::test]
    async fn test_scoped_provider_yields_value_and_release() {
        let dep = Dependency::scoped("session", vec![], |_| {
            Ok(Scoped::with_release("conn".to_string(), || async {}))
        })
        .unwrap();
        assert_eq!(dep.shape(), ProviderShape::Scoped);
        assert!(dep.type_name().ends_with("String"));

        let (value, release) = dep.acquire(Args::new()).await.unwrap();
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("conn"));
        release.expect("scoped providers hand back a release").release().await;
    }
}
