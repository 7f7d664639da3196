//! # Dispatch
//!
//! Maps a matched route's dispatch name to an async target and invokes it.

use crate::container::Container;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::resolver::Entity;
use crate::response::Response;
use crate::route::Route;
use crate::types::ParamValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async dispatch target
pub type DispatchTarget = Arc<dyn Fn(DispatchContext) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// Everything a dispatch target receives
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Request after `RequestReceived` middleware
    pub request: Request,
    /// Matched route with converted (and resolved) parameters
    pub route: Route,
    /// Request-scoped container
    pub container: Container,
}

impl DispatchContext {
    /// Captured parameter by name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.route.param(name)
    }

    /// Captured parameter as i64
    #[must_use]
    pub fn param_int(&self, name: &str) -> Option<i64> {
        self.route.get_int(name)
    }

    /// Resolved entity bound to a parameter
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.route.get_entity(name)
    }
}

/// Registry of dispatch targets keyed by name
#[derive(Clone, Default)]
pub struct Dispatcher {
    targets: HashMap<String, DispatchTarget>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async function under `name`, replacing any previous one
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, target: F)
    where
        F: Fn(DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let target: DispatchTarget = Arc::new(move |ctx| Box::pin(target(ctx)));
        self.targets.insert(name.into(), target);
    }

    /// Whether a target is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Number of registered targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no target is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Invoke the target named by the route
    ///
    /// # Errors
    ///
    /// Returns `Error::DispatchTargetMissing` for an unknown name, or
    /// whatever the target returns.
    pub async fn dispatch(&self, ctx: DispatchContext) -> Result<Response> {
        let name = ctx.route.dispatch.clone();
        let target = self
            .targets
            .get(&name)
            .ok_or_else(|| Error::DispatchTargetMissing { target: name.clone() })?;
        debug!(target = %name, path = %ctx.request.path, "Dispatching");
        target(ctx).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn context(dispatch: &str) -> DispatchContext {
        DispatchContext {
            request: Request::new(Method::Get, "/"),
            route: Route::get("/", dispatch).unwrap(),
            container: Container::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_registered_target() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("home", |_ctx| async { Ok(Response::text("home")) });
        assert!(dispatcher.contains("home"));

        let response = dispatcher.dispatch(context("home")).await.unwrap();
        assert_eq!(response.body, "home");
    }

    #[tokio::test]
    async fn test_dispatch_missing_target() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.dispatch(context("nowhere")).await.unwrap_err();
        assert!(matches!(err, Error::DispatchTargetMissing { ref target } if target == "nowhere"));
    }

    #[tokio::test]
    async fn test_target_sees_params() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("show", |ctx: DispatchContext| async move {
            let id = ctx.param_int("id").unwrap_or_default();
            Ok(Response::text(id.to_string()))
        });

        let mut ctx = context("show");
        ctx.route.matches = vec![("id".to_string(), ParamValue::Int(9))];
        assert_eq!(dispatcher.dispatch(ctx).await.unwrap().body, "9");
    }
}
