//! Named event handlers and their invocation.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::BoxError;
use tracing::instrument;

use crate::errors::{panic_message, RegistrationError};
use crate::invoker::outcome::{format_trace, HandlerFailure, Outcome, PanicError, ScopeFailure};
use crate::routing::EventKey;
use crate::scope::{resolve, Args, Binding, Param, ResolutionCache, ResolveContext};
use crate::socket::wire::Reply;

/// Values a handler may return.
pub trait IntoReply {
    fn into_reply(self) -> Option<Reply>;
}

impl IntoReply for () {
    fn into_reply(self) -> Option<Reply> {
        None
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Option<Reply> {
        Some(self)
    }
}

impl IntoReply for Option<Reply> {
    fn into_reply(self) -> Option<Reply> {
        self
    }
}

type HandlerFn = dyn Fn(Args) -> BoxFuture<'static, Result<Option<Reply>, BoxError>> + Send + Sync;

/// A handler body together with its validated parameter binding.
pub struct EventHandler {
    name: String,
    binding: Binding,
    call: Box<HandlerFn>,
}

impl EventHandler {
    /// Asynchronous handler.
    pub fn new<F, Fut, R>(name: impl Into<String>, params: Vec<Param>, f: F) -> Result<Self, RegistrationError>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
        R: IntoReply,
    {
        Self::build(name, params, move |args| {
            f(args).map(|result| result.map(IntoReply::into_reply)).boxed()
        })
    }

    /// Synchronous handler.
    pub fn sync<F, R>(name: impl Into<String>, params: Vec<Param>, f: F) -> Result<Self, RegistrationError>
    where
        F: Fn(&Args) -> Result<R, BoxError> + Send + Sync + 'static,
        R: IntoReply,
    {
        Self::build(name, params, move |args| {
            let result = f(&args).map(IntoReply::into_reply);
            async move { result }.boxed()
        })
    }

    fn build<C>(name: impl Into<String>, params: Vec<Param>, call: C) -> Result<Self, RegistrationError>
    where
        C: Fn(Args) -> BoxFuture<'static, Result<Option<Reply>, BoxError>> + Send + Sync + 'static,
    {
        let name = name.into();
        let binding = Binding::new(format!("handler {name}"), params)?;
        Ok(Self {
            name,
            binding,
            call: Box::new(call),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Bind parameters against `cache`, then run the body.
    ///
    /// Never fails: every error, panics included, comes back as an [`Outcome`].
    #[instrument(skip_all, fields(handler = %self.name, event = %event))]
    pub async fn run(
        &self,
        route: &str,
        event: &EventKey,
        ctx: &ResolveContext<'_>,
        cache: &mut ResolutionCache,
    ) -> Outcome {
        let args = match resolve(&self.binding, ctx, cache).await {
            Ok(args) => args,
            Err(error) => {
                tracing::warn!(route, param = %error.param, error = %error, "Parameter binding failed");
                return Outcome::ScopeFailure(ScopeFailure {
                    route: route.to_string(),
                    event: event.clone(),
                    handler: self.name.clone(),
                    param: error.param.clone(),
                    error,
                });
            }
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(async { (self.call)(args).await })
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let error: BoxError = match result {
            Ok(Ok(Some(reply))) => {
                tracing::debug!(?elapsed, reply = %reply.event, "Handler replied");
                return Outcome::Reply(reply);
            }
            Ok(Ok(None)) => {
                tracing::debug!(?elapsed, "Handler completed");
                return Outcome::None;
            }
            Ok(Err(error)) => error,
            Err(panic) => Box::new(PanicError {
                message: panic_message(panic.as_ref()),
            }),
        };

        let trace = format_trace(error.as_ref());
        tracing::error!(route, ?elapsed, error = %error, trace = %trace, "Handler failed");
        Outcome::HandlerFailure(HandlerFailure {
            route: route.to_string(),
            event: event.clone(),
            handler: self.name.clone(),
            error,
            trace,
        })
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("name", &self.name)
            .field("params", &self.binding.params().len())
            .finish_non_exhaustive()
    }
}
