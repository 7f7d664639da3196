//! # Valkyrja Core
//!
//! Routing and request-dispatch core for the Valkyrja framework.
//! Turns an incoming request into a response through a route collection,
//! a matcher, entity resolution, a dispatcher and six middleware chains.
//!
//! ## Modules
//!
//! - `route`, `parameter`, `method` - Route definitions and path parameters
//! - `collection` - Indexed route collection with a serializable cache form
//! - `matcher` - Static and regex matching, URL generation
//! - `resolver`, `database` - Entity binding backed by SQLx (SQLite, PostgreSQL)
//! - `dispatch` - Named dispatch targets
//! - `middleware` - Request lifecycle chains and built-in middleware
//! - `handler` - Request lifecycle and error policy
//! - `server`, `transport` - HTTP server built on Hyper
//! - `config`, `logging` - TOML configuration and tracing setup
//! - `request`, `response`, `container` - Per-request data
//! - `types`, `validation`, `json`, `error` - Supporting types

pub mod collection;
pub mod config;
pub mod container;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod json;
pub mod logging;
pub mod matcher;
pub mod method;
pub mod middleware;
pub mod parameter;
pub mod request;
pub mod resolver;
pub mod response;
pub mod route;
pub mod server;
pub mod transport;
pub mod types;
pub mod validation;

pub use collection::{Collection, CollectionCache, LazyRoute};
pub use config::{AppConfig, LogConfig, RouteTableConfig, ServerConfig};
pub use container::Container;
pub use database::{DatabasePool, DbValue, SqlRepository};
pub use dispatch::{DispatchContext, Dispatcher};
pub use error::{Error, HttpException, Result};
pub use handler::{error_response, RequestHandler};
pub use json::{parse_json, to_json};
pub use logging::init_tracing;
pub use matcher::Matcher;
pub use method::Method;
pub use middleware::{
    Chain, CorsMiddleware, JwtAuthMiddleware, LoggingMiddleware, MiddlewareResult, Middlewares,
    Next, RateLimitMiddleware, RequestIdMiddleware, TimingMiddleware,
};
pub use parameter::Parameter;
pub use request::Request;
pub use resolver::{Entity, EntityResolver, MemoryRepository, Repository};
pub use response::Response;
pub use route::Route;
pub use server::Server;
pub use transport::{BufferTransport, ChannelTransport, Transport};
pub use types::{CastType, ParamValue};
pub use validation::{FieldError, ValidationCode, ValidationErrors};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
