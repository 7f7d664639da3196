//! # Middleware System
//!
//! One ordered chain per request lifecycle stage. Each link receives the
//! stage's inputs plus a [`Next`] cursor over the remaining links; calling
//! `next.run(..)` continues the chain, returning without calling it
//! short-circuits. The handler only needs to know whether a chain produced
//! a response and how many links ran.
//!
//! | Stage              | Input                                  | Output             |
//! |--------------------|----------------------------------------|--------------------|
//! | `RequestReceived`  | `&mut Request`                         | `MiddlewareResult` |
//! | `RouteDispatched`  | `&Request`, `&Route`, `&Container`     | `MiddlewareResult` |
//! | `RouteNotMatched`  | `&Request`, `Response`                 | `Response`         |
//! | `ThrowableCaught`  | `&Request`, `&Error`, `Response`       | `Response`         |
//! | `SendingResponse`  | `&Request`, `Response`                 | `Response`         |
//! | `Terminated`       | `&Request`, `&Response`                | nothing, all run   |

use crate::container::{Container, CLAIMS_KEY};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::route::Route;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Result of a request-side chain
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to matching / dispatch
    Continue,
    /// Short-circuit with this response
    Respond(Response),
}

/// Cursor over the links after the current one
pub struct Next<'a, M: ?Sized> {
    links: &'a [Arc<M>],
    invoked: &'a Cell<usize>,
}

impl<'a, M: ?Sized> Next<'a, M> {
    fn split(self) -> Option<(&'a Arc<M>, Self)> {
        let (link, rest) = self.links.split_first()?;
        self.invoked.set(self.invoked.get() + 1);
        Some((
            link,
            Self {
                links: rest,
                invoked: self.invoked,
            },
        ))
    }

    /// Number of links not yet run
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.links.len()
    }
}

/// Output of a chain run
#[derive(Debug)]
pub struct ChainRun<T> {
    /// What the chain produced
    pub output: T,
    /// How many links were invoked
    pub invoked: usize,
}

/// Ordered list of links for one stage
pub struct Chain<M: ?Sized> {
    links: Vec<Arc<M>>,
}

impl<M: ?Sized> Clone for Chain<M> {
    fn clone(&self) -> Self {
        Self {
            links: self.links.clone(),
        }
    }
}

impl<M: ?Sized> Default for Chain<M> {
    fn default() -> Self {
        Self { links: Vec::new() }
    }
}

impl<M: ?Sized> Chain<M> {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link
    pub fn add(&mut self, link: Arc<M>) {
        self.links.push(link);
    }

    /// Get the number of links
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn start<T>(&self, run: impl FnOnce(Next<'_, M>) -> T) -> ChainRun<T> {
        let invoked = Cell::new(0);
        let output = run(Next {
            links: &self.links,
            invoked: &invoked,
        });
        ChainRun {
            output,
            invoked: invoked.get(),
        }
    }
}

/// Runs before matching; may rewrite the request or answer it
pub trait RequestReceivedMiddleware: Send + Sync {
    /// Handle the request
    fn handle(&self, request: &mut Request, next: Next<'_, dyn RequestReceivedMiddleware>) -> MiddlewareResult;
}

impl Next<'_, dyn RequestReceivedMiddleware> {
    /// Continue with the next link
    pub fn run(self, request: &mut Request) -> MiddlewareResult {
        match self.split() {
            Some((link, next)) => link.handle(request, next),
            None => MiddlewareResult::Continue,
        }
    }
}

impl Chain<dyn RequestReceivedMiddleware> {
    /// Run the chain
    pub fn run(&self, request: &mut Request) -> ChainRun<MiddlewareResult> {
        self.start(|next| next.run(request))
    }
}

/// Runs once a route matched, before its dispatch target
pub trait RouteDispatchedMiddleware: Send + Sync {
    /// Inspect the matched route
    fn handle(
        &self,
        request: &Request,
        route: &Route,
        container: &Container,
        next: Next<'_, dyn RouteDispatchedMiddleware>,
    ) -> MiddlewareResult;
}

impl Next<'_, dyn RouteDispatchedMiddleware> {
    /// Continue with the next link
    pub fn run(self, request: &Request, route: &Route, container: &Container) -> MiddlewareResult {
        match self.split() {
            Some((link, next)) => link.handle(request, route, container, next),
            None => MiddlewareResult::Continue,
        }
    }
}

impl Chain<dyn RouteDispatchedMiddleware> {
    /// Run the chain
    pub fn run(&self, request: &Request, route: &Route, container: &Container) -> ChainRun<MiddlewareResult> {
        self.start(|next| next.run(request, route, container))
    }
}

/// Runs on the 404/405 response when no route matched
pub trait RouteNotMatchedMiddleware: Send + Sync {
    /// Transform the response
    fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn RouteNotMatchedMiddleware>) -> Response;
}

impl Next<'_, dyn RouteNotMatchedMiddleware> {
    /// Continue with the next link
    pub fn run(self, request: &Request, response: Response) -> Response {
        match self.split() {
            Some((link, next)) => link.handle(request, response, next),
            None => response,
        }
    }
}

impl Chain<dyn RouteNotMatchedMiddleware> {
    /// Run the chain
    pub fn run(&self, request: &Request, response: Response) -> ChainRun<Response> {
        self.start(|next| next.run(request, response))
    }
}

/// Runs on the error response produced for a fault
pub trait ThrowableCaughtMiddleware: Send + Sync {
    /// Transform the error response
    fn handle(
        &self,
        request: &Request,
        error: &Error,
        response: Response,
        next: Next<'_, dyn ThrowableCaughtMiddleware>,
    ) -> Response;
}

impl Next<'_, dyn ThrowableCaughtMiddleware> {
    /// Continue with the next link
    pub fn run(self, request: &Request, error: &Error, response: Response) -> Response {
        match self.split() {
            Some((link, next)) => link.handle(request, error, response, next),
            None => response,
        }
    }
}

impl Chain<dyn ThrowableCaughtMiddleware> {
    /// Run the chain
    pub fn run(&self, request: &Request, error: &Error, response: Response) -> ChainRun<Response> {
        self.start(|next| next.run(request, error, response))
    }
}

/// Runs on every response right before it is sent
pub trait SendingResponseMiddleware: Send + Sync {
    /// Transform the response
    fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn SendingResponseMiddleware>) -> Response;
}

impl Next<'_, dyn SendingResponseMiddleware> {
    /// Continue with the next link
    pub fn run(self, request: &Request, response: Response) -> Response {
        match self.split() {
            Some((link, next)) => link.handle(request, response, next),
            None => response,
        }
    }
}

impl Chain<dyn SendingResponseMiddleware> {
    /// Run the chain
    pub fn run(&self, request: &Request, response: Response) -> ChainRun<Response> {
        self.start(|next| next.run(request, response))
    }
}

/// Runs after the response was handed to the transport
pub trait TerminatedMiddleware: Send + Sync {
    /// Observe the finished exchange
    fn terminate(&self, request: &Request, response: &Response);
}

impl Chain<dyn TerminatedMiddleware> {
    /// Run every link
    pub fn run(&self, request: &Request, response: &Response) -> usize {
        for link in &self.links {
            link.terminate(request, response);
        }
        self.links.len()
    }
}

/// All chains of a request handler
#[derive(Clone, Default)]
pub struct Middlewares {
    /// Before matching
    pub request_received: Chain<dyn RequestReceivedMiddleware>,
    /// After a match, before the dispatch target runs
    pub route_dispatched: Chain<dyn RouteDispatchedMiddleware>,
    /// On a 404/405
    pub route_not_matched: Chain<dyn RouteNotMatchedMiddleware>,
    /// On a fault
    pub throwable_caught: Chain<dyn ThrowableCaughtMiddleware>,
    /// Before sending
    pub sending_response: Chain<dyn SendingResponseMiddleware>,
    /// After sending
    pub terminated: Chain<dyn TerminatedMiddleware>,
}

impl Middlewares {
    /// No middleware at all
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request ids, logging and timing
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut middlewares = Self::new();
        let request_id = Arc::new(RequestIdMiddleware::new());
        let logging = Arc::new(LoggingMiddleware::new());
        middlewares.request_received.add(request_id.clone());
        middlewares.request_received.add(logging.clone());
        middlewares.sending_response.add(request_id);
        middlewares.sending_response.add(Arc::new(TimingMiddleware::new()));
        middlewares.terminated.add(logging);
        middlewares
    }

    /// Require a valid bearer token on routes marked `auth_required`
    #[must_use]
    pub fn with_jwt_auth(mut self, secret: &str) -> Self {
        self.route_dispatched.add(Arc::new(JwtAuthMiddleware::new(secret)));
        self
    }

    /// Add CORS headers to every response
    #[must_use]
    pub fn with_cors(mut self, cors: CorsMiddleware) -> Self {
        self.sending_response.add(Arc::new(cors));
        self
    }

    /// Limit requests per peer address
    #[must_use]
    pub fn with_rate_limit(self, capacity: u64, refill_per_sec: u64) -> Self {
        self.with_rate_limiter(RateLimitMiddleware::new(capacity, refill_per_sec))
    }

    /// Add a configured rate limiter
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimitMiddleware) -> Self {
        self.request_received.add(Arc::new(limiter));
        self
    }
}

/// Logging middleware - logs requests in structured format
#[derive(Debug, Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl RequestReceivedMiddleware for LoggingMiddleware {
    fn handle(&self, request: &mut Request, next: Next<'_, dyn RequestReceivedMiddleware>) -> MiddlewareResult {
        let request_id = request.header("x-request-id").unwrap_or("-");
        if self.log_headers {
            info!(
                method = %request.method,
                path = %request.path,
                request_id = %request_id,
                headers = ?request.headers_map(),
                "Request received"
            );
        } else {
            info!(
                method = %request.method,
                path = %request.path,
                request_id = %request_id,
                "Request received"
            );
        }
        next.run(request)
    }
}

impl TerminatedMiddleware for LoggingMiddleware {
    fn terminate(&self, request: &Request, response: &Response) {
        info!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            request_id = %request.header("x-request-id").unwrap_or("-"),
            "Response sent"
        );
    }
}

/// Timing middleware - reports time spent since the request arrived
#[derive(Debug, Default)]
pub struct TimingMiddleware;

impl TimingMiddleware {
    /// Create a new timing middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SendingResponseMiddleware for TimingMiddleware {
    fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn SendingResponseMiddleware>) -> Response {
        let elapsed = request.received_at.elapsed();
        debug!(
            method = %request.method,
            path = %request.path,
            duration_us = %elapsed.as_micros(),
            "Request timing"
        );
        let response = response.with_header("x-response-time", &format!("{}us", elapsed.as_micros()));
        next.run(request, response)
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

/// Assigns `x-request-id` when absent and echoes it on the response
#[derive(Debug, Default)]
pub struct RequestIdMiddleware;

impl RequestIdMiddleware {
    /// Create a new request id middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RequestReceivedMiddleware for RequestIdMiddleware {
    fn handle(&self, request: &mut Request, next: Next<'_, dyn RequestReceivedMiddleware>) -> MiddlewareResult {
        if request.header("x-request-id").is_none() {
            request.set_header("x-request-id", &generate_request_id());
        }
        next.run(request)
    }
}

impl SendingResponseMiddleware for RequestIdMiddleware {
    fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn SendingResponseMiddleware>) -> Response {
        let response = match request.header("x-request-id") {
            Some(id) => response.with_header("x-request-id", id),
            None => response,
        };
        next.run(request, response)
    }
}

/// CORS middleware - adds Cross-Origin Resource Sharing headers
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }
}

impl SendingResponseMiddleware for CorsMiddleware {
    fn handle(&self, request: &Request, response: Response, next: Next<'_, dyn SendingResponseMiddleware>) -> Response {
        let response = response
            .with_header("Access-Control-Allow-Origin", &self.allow_origin)
            .with_header("Access-Control-Allow-Methods", &self.allow_methods)
            .with_header("Access-Control-Allow-Headers", &self.allow_headers);
        next.run(request, response)
    }
}

/// Per-client token bucket limiter.
///
/// Clients are keyed by peer address. At most `max_clients` buckets are
/// tracked; when a new client arrives at the bound, buckets that have
/// refilled completely are dropped first, then the least recently seen one.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    capacity: f64,
    refill_per_sec: f64,
    max_clients: usize,
    trust_forwarded: bool,
    buckets: Mutex<HashMap<String, Bucket>>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    seen: Instant,
}

impl Bucket {
    fn level(self, now: Instant, capacity: f64, refill_per_sec: f64) -> f64 {
        let refilled = now.duration_since(self.seen).as_secs_f64() * refill_per_sec;
        (self.tokens + refilled).min(capacity)
    }
}

impl RateLimitMiddleware {
    /// Default bound on tracked clients
    pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

    /// Allow bursts of `capacity` requests, refilled at `refill_per_sec`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            max_clients: Self::DEFAULT_MAX_CLIENTS,
            trust_forwarded: false,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the number of tracked clients (at least one)
    #[must_use]
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    /// Key clients by `x-client-ip`; only safe behind a proxy that sets it
    #[must_use]
    pub const fn trust_forwarded(mut self) -> Self {
        self.trust_forwarded = true;
        self
    }

    fn admit(&self, client: &str, now: Instant) -> bool {
        let (capacity, rate) = (self.capacity, self.refill_per_sec);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if !buckets.contains_key(client) && buckets.len() >= self.max_clients {
            buckets.retain(|_, bucket| bucket.level(now, capacity, rate) < capacity);
            if buckets.len() >= self.max_clients {
                let stale = buckets
                    .iter()
                    .min_by_key(|(_, bucket)| bucket.seen)
                    .map(|(key, _)| key.clone());
                if let Some(stale) = stale {
                    buckets.remove(&stale);
                }
            }
        }

        let bucket = buckets.entry(client.to_string()).or_insert(Bucket {
            tokens: capacity,
            seen: now,
        });
        let level = bucket.level(now, capacity, rate);
        bucket.seen = now;
        if level >= 1.0 {
            bucket.tokens = level - 1.0;
            true
        } else {
            bucket.tokens = level;
            false
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RequestReceivedMiddleware for RateLimitMiddleware {
    fn handle(&self, request: &mut Request, next: Next<'_, dyn RequestReceivedMiddleware>) -> MiddlewareResult {
        let client = request.client_key(self.trust_forwarded);
        if self.admit(&client, Instant::now()) {
            next.run(request)
        } else {
            warn!(client = %client, path = %request.path, "Rate limit exceeded");
            MiddlewareResult::Respond(Response::error(429, "Rate limit exceeded"))
        }
    }
}

/// Bearer-token check for routes marked `auth_required`
///
/// Validated claims are stored in the container under [`CLAIMS_KEY`] as a
/// `serde_json::Value`.
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthMiddleware {
    /// HS256 with a shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl RouteDispatchedMiddleware for JwtAuthMiddleware {
    fn handle(
        &self,
        request: &Request,
        route: &Route,
        container: &Container,
        next: Next<'_, dyn RouteDispatchedMiddleware>,
    ) -> MiddlewareResult {
        if !route.auth_required {
            return next.run(request, route, container);
        }
        let Some(token) = request.bearer_token() else {
            return MiddlewareResult::Respond(Response::error(401, "Missing or invalid Authorization header"));
        };
        match decode::<serde_json::Value>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                container.set_singleton(CLAIMS_KEY, data.claims);
                next.run(request, route, container)
            }
            Err(e) => {
                warn!(path = %request.path, error = %e, "JWT validation failed");
                MiddlewareResult::Respond(Response::error(401, "Unauthorized"))
            }
        }
    }
}

impl std::fmt::Debug for JwtAuthMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthMiddleware").finish_non_exhaustive()
    }
}
