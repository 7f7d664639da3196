//! # Request Handler
//!
//! Drives one request through its lifecycle:
//!
//! ```text
//! RequestReceived ─┬─ respond ───────────────────────────────┐
//!                  └─ match ─┬─ miss ─ 404/405 ─ RouteNotMatched ┤
//!                            └─ hit ─ entities ─ RouteDispatched ┤
//!                                               └─ dispatch ─────┤
//!                      any error ─ error response ─ ThrowableCaught ┤
//!                                                  SendingResponse ─ send ─ Terminated
//! ```
//!
//! Request outcomes (404, 405, 400, HTTP exceptions) always become
//! responses. Other faults become a generic 500 in production and are
//! returned as `Err` in debug mode, after the `ThrowableCaught` chain ran.

use crate::collection::Collection;
use crate::container::{Container, REQUEST_KEY, RESPONSE_KEY, ROUTE_KEY};
use crate::dispatch::{DispatchContext, Dispatcher};
use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::middleware::{MiddlewareResult, Middlewares};
use crate::request::Request;
use crate::resolver::{EntityResolver, Repository, ResolvedEntities};
use crate::response::Response;
use crate::transport::Transport;
use crate::validation::ValidationErrors;
use hyper::StatusCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Response for an error when it is not re-raised
#[must_use]
pub fn error_response(error: &Error) -> Response {
    match error {
        Error::HttpException(exception) => match &exception.response {
            Some(response) => response.clone().with_status(exception.status),
            None if exception.status >= 500 && exception.message.is_none() => {
                Response::server_error(exception.trace_code.as_deref()).with_status(exception.status)
            }
            None => {
                let message = exception
                    .message
                    .as_deref()
                    .unwrap_or_else(|| reason_phrase(exception.status));
                Response::error(exception.status, message)
            }
        },
        Error::InvalidParameterValue { .. } => ValidationErrors::from_error(error)
            .map_or_else(|| Response::error(400, "Bad Request"), |errors| Response::validation_failed(&errors)),
        Error::RouteNotFound { .. } | Error::EntityNotFound { .. } => Response::not_found(),
        Error::MethodNotAllowed { allowed, .. } => Response::method_not_allowed(allowed),
        Error::PayloadTooLarge { .. }
        | Error::Cancelled => Response::error(error.status(), reason_phrase(error.status())),
        _ => Response::server_error(None),
    }
}

fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Error")
}

/// Routes, resolves, dispatches and finalizes requests
#[derive(Clone)]
pub struct RequestHandler {
    matcher: Matcher,
    dispatcher: Arc<Dispatcher>,
    resolver: Option<EntityResolver>,
    middlewares: Middlewares,
    debug: bool,
}

impl RequestHandler {
    /// Handler without middleware or repository, in production mode
    #[must_use]
    pub fn new(collection: Arc<Collection>, dispatcher: Dispatcher) -> Self {
        Self {
            matcher: Matcher::new(collection),
            dispatcher: Arc::new(dispatcher),
            resolver: None,
            middlewares: Middlewares::new(),
            debug: false,
        }
    }

    /// Resolve entity parameters through `repository`
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.resolver = Some(EntityResolver::new(repository));
        self
    }

    /// Replace the middleware chains
    #[must_use]
    pub fn with_middlewares(mut self, middlewares: Middlewares) -> Self {
        self.middlewares = middlewares;
        self
    }

    /// Re-raise faults instead of answering 500
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Route matcher
    #[must_use]
    pub const fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Whether faults are re-raised
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        self.debug
    }

    /// Handle a request with a fresh container
    ///
    /// # Errors
    ///
    /// In debug mode, returns faults that are not request outcomes.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        self.process(request, &Container::new(), None).await
    }

    /// Handle a request, recording into `container`
    ///
    /// # Errors
    ///
    /// See [`RequestHandler::handle`].
    pub async fn handle_with_container(&self, request: Request, container: &Container) -> Result<Response> {
        self.process(request, container, None).await
    }

    /// Handle a request that is abandoned when `token` is cancelled
    ///
    /// Cancellation takes the error path as `Error::Cancelled` (503).
    ///
    /// # Errors
    ///
    /// See [`RequestHandler::handle`].
    pub async fn handle_with_cancel(
        &self,
        request: Request,
        container: &Container,
        token: &CancellationToken,
    ) -> Result<Response> {
        self.process(request, container, Some(token)).await
    }

    async fn process(
        &self,
        mut request: Request,
        container: &Container,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let received = self.middlewares.request_received.run(&mut request);
        container.set_singleton(REQUEST_KEY, request.clone());

        let response = match received.output {
            MiddlewareResult::Respond(response) => {
                debug!(path = %request.path, links = received.invoked, "RequestReceived short-circuit");
                response
            }
            MiddlewareResult::Continue => {
                let outcome = match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        () = token.cancelled() => Err(Error::Cancelled),
                        outcome = self.route(&request, container) => outcome,
                    },
                    None => self.route(&request, container).await,
                };
                match outcome {
                    Ok(response) => response,
                    Err(miss) if miss.is_route_miss() => self.not_matched(&request, &miss),
                    Err(error) => self.recover(&request, error)?,
                }
            }
        };

        let response = self.middlewares.sending_response.run(&request, response).output;
        container.set_singleton(RESPONSE_KEY, response.clone());
        Ok(response)
    }

    async fn route(&self, request: &Request, container: &Container) -> Result<Response> {
        let Some(mut route) = self.matcher.match_route(&request.path, request.method)? else {
            let method = request.method.to_string();
            let path = request.path.clone();
            let allowed = self.matcher.allowed_methods(&request.path);
            return Err(if allowed.is_empty() {
                Error::RouteNotFound { method, path }
            } else {
                Error::MethodNotAllowed { method, path, allowed }
            });
        };

        let mut resolved = ResolvedEntities::new();
        match &self.resolver {
            Some(resolver) => resolver.resolve_route(&mut route, &mut resolved).await?,
            None if route.parameters.iter().any(|p| p.is_entity() && route.param(&p.name).is_some()) => {
                return Err(Error::Config {
                    message: format!("route `{}` binds entities but no repository is configured", route.key()),
                });
            }
            None => {}
        }
        for (entity, index, record) in resolved.iter() {
            container.set_singleton(ResolvedEntities::container_key(entity, index), record.clone());
        }
        container.set_singleton(ROUTE_KEY, route.clone());

        let dispatched = self.middlewares.route_dispatched.run(request, &route, container);
        if let MiddlewareResult::Respond(response) = dispatched.output {
            debug!(path = %request.path, links = dispatched.invoked, "RouteDispatched short-circuit");
            return Ok(response);
        }

        self.dispatcher
            .dispatch(DispatchContext {
                request: request.clone(),
                route,
                container: container.clone(),
            })
            .await
    }

    fn not_matched(&self, request: &Request, miss: &Error) -> Response {
        let response = error_response(miss);
        debug!(method = %request.method, path = %request.path, status = response.status, "No route matched");
        self.middlewares.route_not_matched.run(request, response).output
    }

    fn recover(&self, request: &Request, error: Error) -> Result<Response> {
        let response = error_response(&error);
        let response = self.middlewares.throwable_caught.run(request, &error, response).output;

        if error.is_http_outcome() {
            debug!(path = %request.path, status = response.status, error = %error, "Request outcome");
            return Ok(response);
        }
        if self.debug {
            error!(path = %request.path, error = %error, "Unhandled error re-raised");
            return Err(error);
        }
        warn!(path = %request.path, error = %error, "Unhandled error converted to 500");
        Ok(response)
    }

    /// Hand the response to the transport
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub fn send(&self, response: &Response, transport: &dyn Transport) -> Result<()> {
        transport.send(response.clone())
    }

    /// Notify the `Terminated` chain; every link runs
    pub fn terminate(&self, request: &Request, response: &Response) {
        self.middlewares.terminated.run(request, response);
    }

    /// Handle, send, then terminate
    ///
    /// # Errors
    ///
    /// Returns re-raised faults (debug mode) or transport errors.
    pub async fn run(&self, request: Request, transport: &dyn Transport) -> Result<Response> {
        let container = Container::new();
        let original = request.clone();
        let response = self.handle_with_container(request, &container).await?;
        self.send(&response, transport)?;
        let request = container.get::<Request>(REQUEST_KEY).unwrap_or(original);
        self.terminate(&request, &response);
        Ok(response)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("routes", &self.matcher.collection().len())
            .field("dispatcher", &self.dispatcher)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpException;
    use crate::method::Method;
    use crate::middleware::{Next, RouteNotMatchedMiddleware, ThrowableCaughtMiddleware};
    use crate::route::Route;
    use crate::transport::BufferTransport;

    fn handler() -> RequestHandler {
        let mut collection = Collection::new();
        collection.add(Route::get("/ok", "ok").unwrap()).unwrap();
        collection.add(Route::get("/boom", "boom").unwrap()).unwrap();
        collection.add(Route::get("/teapot", "teapot").unwrap()).unwrap();
        collection.add(Route::get("/ghost", "ghost").unwrap()).unwrap();
        collection.add(Route::get("/slow", "slow").unwrap()).unwrap();

        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ok", |_| async { Ok(Response::text("ok")) });
        dispatcher.register("boom", |_| async { Err(Error::invalid_argument("boom")) });
        dispatcher.register("teapot", |_| async {
            Err(HttpException::new(418).with_message("short and stout").into())
        });
        dispatcher.register("slow", |_| async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(Response::text("late"))
        });

        RequestHandler::new(Arc::new(collection), dispatcher)
    }

    #[tokio::test]
    async fn test_handle_ok_stores_in_container() {
        let container = Container::new();
        let response = handler()
            .handle_with_container(Request::new(Method::Get, "/ok"), &container)
            .await
            .unwrap();
        assert_eq!(response.body, "ok");
        assert!(container.has(ROUTE_KEY));
        assert_eq!(container.get::<Response>(RESPONSE_KEY).unwrap(), response);
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let handler = handler();
        let response = handler.handle(Request::new(Method::Get, "/nope")).await.unwrap();
        assert_eq!(response.status, 404);

        let response = handler.handle(Request::new(Method::Post, "/ok")).await.unwrap();
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("GET, HEAD"));
    }

    #[tokio::test]
    async fn test_fault_becomes_500_in_production() {
        let response = handler().handle(Request::new(Method::Get, "/boom")).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.body, "Unknown Server Error Occurred");
    }

    #[tokio::test]
    async fn test_fault_reraised_in_debug() {
        let result = handler()
            .with_debug(true)
            .handle(Request::new(Method::Get, "/boom"))
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_http_exception_honored_in_debug() {
        let response = handler()
            .with_debug(true)
            .handle(Request::new(Method::Get, "/teapot"))
            .await
            .unwrap();
        assert_eq!(response.status, 418);
        assert!(response.body.contains("short and stout"));
    }

    #[tokio::test]
    async fn test_missing_target_is_fault() {
        let response = handler().handle(Request::new(Method::Get, "/ghost")).await.unwrap();
        assert_eq!(response.status, 500);
    }

    #[tokio::test]
    async fn test_cancelled_is_503() {
        let token = CancellationToken::new();
        token.cancel();
        let response = handler()
            .handle_with_cancel(Request::new(Method::Get, "/slow"), &Container::new(), &token)
            .await
            .unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_run_sends_once() {
        let transport = BufferTransport::new();
        let response = handler()
            .run(Request::new(Method::Get, "/ok"), &transport)
            .await
            .unwrap();
        assert_eq!(transport.sent(), vec![response]);
    }

    #[test]
    fn test_error_response_mapping() {
        let exception = HttpException::new(503).with_trace_code("t-1");
        let response = error_response(&exception.into());
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "Unknown Server Error Occurred Trace Code: t-1");

        let prebuilt = HttpException::new(302).with_response(Response::text("moved"));
        let response = error_response(&prebuilt.into());
        assert_eq!((response.status, response.body.as_str()), (302, "moved"));

        let invalid = Error::InvalidParameterValue {
            name: "id".to_string(),
            value: "x".to_string(),
            expected: "int".to_string(),
        };
        let response = error_response(&invalid);
        assert_eq!(response.status, 400);
        assert!(response.body.contains("INVALID_TYPE"));

        let missing = Error::RouteNotFound {
            method: "GET".to_string(),
            path: "/nope".to_string(),
        };
        assert_eq!(error_response(&missing).status, 404);

        let wrong_method = Error::MethodNotAllowed {
            method: "POST".to_string(),
            path: "/ok".to_string(),
            allowed: vec![Method::Get, Method::Head],
        };
        let response = error_response(&wrong_method);
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("GET, HEAD"));
    }

    struct Tag(&'static str);

    impl RouteNotMatchedMiddleware for Tag {
        fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn RouteNotMatchedMiddleware>) -> Response {
            next.run(request, response).with_header("x-chain", self.0)
        }
    }

    impl ThrowableCaughtMiddleware for Tag {
        fn handle(
            &self,
            request: &Request,
            error: &Error,
            response: Response,
            next: Next<'_, dyn ThrowableCaughtMiddleware>,
        ) -> Response {
            next.run(request, error, response).with_header("x-chain", self.0)
        }
    }

    #[tokio::test]
    async fn test_route_miss_runs_not_matched_chain_in_debug() {
        let mut middlewares = Middlewares::new();
        middlewares.route_not_matched.add(Arc::new(Tag("not-matched")));
        middlewares.throwable_caught.add(Arc::new(Tag("throwable")));
        let handler = handler().with_debug(true).with_middlewares(middlewares);

        let response = handler.handle(Request::new(Method::Delete, "/ok")).await.unwrap();
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("GET, HEAD"));
        assert_eq!(response.header("x-chain"), Some("not-matched"));

        let response = handler.handle(Request::new(Method::Get, "/nope")).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.header("x-chain"), Some("not-matched"));

        let response = handler.handle(Request::new(Method::Get, "/teapot")).await.unwrap();
        assert_eq!(response.header("x-chain"), Some("throwable"));
    }
}
