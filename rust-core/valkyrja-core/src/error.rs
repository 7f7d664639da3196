//! # Error Handling
//!
//! Centralized error types for Valkyrja core.
//! Uses `thiserror` for ergonomic error definitions.

use crate::method::Method;
use crate::response::Response;
use std::fmt;
use thiserror::Error;

/// Result type alias for Valkyrja operations
pub type Result<T> = std::result::Result<T, Error>;

/// An error that carries its own HTTP status and, optionally, a prebuilt response.
///
/// The request handler honors these as-is instead of mapping them to a
/// generic server error.
#[derive(Debug, Clone)]
pub struct HttpException {
    /// HTTP status code to respond with
    pub status: u16,
    /// Optional message used as the response body
    pub message: Option<String>,
    /// Response to send verbatim, if any
    pub response: Option<Response>,
    /// Trace code appended to the default error body
    pub trace_code: Option<String>,
}

impl HttpException {
    /// Create an exception with a status code only
    #[must_use]
    pub const fn new(status: u16) -> Self {
        Self {
            status,
            message: None,
            response: None,
            trace_code: None,
        }
    }

    /// Attach a body message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a prebuilt response
    #[must_use]
    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Attach a trace code
    #[must_use]
    pub fn with_trace_code(mut self, code: impl Into<String>) -> Self {
        self.trace_code = Some(code.into());
        self
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "HTTP {}: {}", self.status, message),
            None => write!(f, "HTTP {}", self.status),
        }
    }
}

/// Core error types for the Valkyrja runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// No static or dynamic route matched the requested path
    #[error("No route found for {method} {path}")]
    RouteNotFound {
        /// Request method
        method: String,
        /// The path that wasn't matched
        path: String,
    },

    /// The path matched, but not for the requested method, or the method
    /// is one the router never serves
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed {
        /// Request method
        method: String,
        /// Request path
        path: String,
        /// Methods advertised in the `Allow` header
        allowed: Vec<Method>,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A route parameter is misconfigured (e.g. entity cast without entity)
    #[error("Invalid parameter `{parameter}` on route {route}: {reason}")]
    InvalidRouteParameter {
        /// Route path or name
        route: String,
        /// Parameter name
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// A captured value could not be cast to the parameter's type
    #[error("Parameter `{name}` expected {expected}, got '{value}'")]
    InvalidParameterValue {
        /// Parameter name
        name: String,
        /// Raw captured value
        value: String,
        /// Expected type description
        expected: String,
    },

    /// Entity lookup for a route parameter returned no row
    #[error("{entity} not found where {column} = '{value}'")]
    EntityNotFound {
        /// Entity (table) name
        entity: String,
        /// Lookup column
        column: String,
        /// Looked-up value
        value: String,
    },

    /// Malformed input such as a corrupt route cache
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem
        message: String,
    },

    /// Typed HTTP exception
    #[error("{0}")]
    HttpException(HttpException),

    /// Route points at a dispatch target nobody registered
    #[error("Dispatch target `{target}` is not registered")]
    DispatchTargetMissing {
        /// Target name
        target: String,
    },

    /// Container has no entry of the requested type under the key
    #[error("Container has no entry for `{key}`")]
    ContainerMissing {
        /// Container key
        key: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Request handling was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// HTTP status this error maps to when converted into a response
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } | Self::EntityNotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::InvalidParameterValue { .. } => 400,
            Self::HttpException(exception) => exception.status,
            Self::PayloadTooLarge { .. } => 413,
            Self::Cancelled => 503,
            _ => 500,
        }
    }

    /// Whether this error is a request outcome rather than a fault.
    ///
    /// Outcomes are always converted to responses; faults are re-raised
    /// in debug mode.
    #[must_use]
    pub const fn is_http_outcome(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound { .. }
                | Self::MethodNotAllowed { .. }
                | Self::EntityNotFound { .. }
                | Self::InvalidParameterValue { .. }
                | Self::HttpException(_)
                | Self::PayloadTooLarge { .. }
                | Self::Cancelled
        )
    }

    /// Whether this error means no route answered the request.
    ///
    /// Route misses run the `RouteNotMatched` chain instead of
    /// `ThrowableCaught`.
    #[must_use]
    pub const fn is_route_miss(&self) -> bool {
        matches!(self, Self::RouteNotFound { .. } | Self::MethodNotAllowed { .. })
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<HttpException> for Error {
    fn from(exception: HttpException) -> Self {
        Self::HttpException(exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_error() {
        let err = Error::RouteNotFound {
            method: "GET".to_string(),
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("/unknown"));
        assert_eq!(err.status(), 404);
        assert!(err.is_http_outcome());
        assert!(err.is_route_miss());
    }

    #[test]
    fn test_method_not_allowed_error() {
        let err = Error::MethodNotAllowed {
            method: "TRACE".to_string(),
            path: "/".to_string(),
            allowed: Method::ALL.to_vec(),
        };
        assert_eq!(err.status(), 405);
        assert!(err.is_http_outcome());
        assert!(err.is_route_miss());
        assert!(!Error::Cancelled.is_route_miss());
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
        assert_eq!(err.status(), 500);
        assert!(!err.is_http_outcome());
    }

    #[test]
    fn test_http_exception_status() {
        let err = Error::from(HttpException::new(418).with_message("teapot"));
        assert_eq!(err.status(), 418);
        assert_eq!(err.to_string(), "HTTP 418: teapot");
    }

    #[test]
    fn test_entity_not_found_is_404() {
        let err = Error::EntityNotFound {
            entity: "users".to_string(),
            column: "id".to_string(),
            value: "7".to_string(),
        };
        assert_eq!(err.status(), 404);
        assert!(err.to_string().contains("users"));
    }
}
