//! # HTTP Response
//!
//! Response value produced by dispatch targets and middleware, converted to
//! a hyper response only at the transport edge.

use crate::validation::ValidationErrors;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::StatusCode;
use std::collections::HashMap;

/// Body of the default 500 response
pub const DEFAULT_ERROR_BODY: &str = "Unknown Server Error Occurred";

/// HTTP Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl Response {
    /// Create a JSON response
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: "text/plain".to_string(),
            ..Self::default()
        }
    }

    /// JSON error body `{"error": message}` with the given status
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::json(body).with_status(status)
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found() -> Self {
        Self::error(404, "Not Found")
    }

    /// 405 with an `Allow` header listing the methods that would match
    #[must_use]
    pub fn method_not_allowed(allowed: &[crate::method::Method]) -> Self {
        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::error(405, "Method Not Allowed").with_header("Allow", &allow)
    }

    /// 400 with validation details
    #[must_use]
    pub fn validation_failed(errors: &ValidationErrors) -> Self {
        Self::json(errors.to_json()).with_status(400)
    }

    /// Default 500 response, optionally suffixed with a trace code
    #[must_use]
    pub fn server_error(trace_code: Option<&str>) -> Self {
        let body = match trace_code {
            Some(code) => format!("{DEFAULT_ERROR_BODY} Trace Code: {code}"),
            None => DEFAULT_ERROR_BODY.to_string(),
        };
        Self::text(body).with_status(500)
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
        } else {
            self.headers.insert(key.to_lowercase(), value.to_string());
        }
    }

    /// Get a header value (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Convert to hyper Response
    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("Content-Type", &self.content_type);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut fallback = hyper::Response::new(Full::new(Bytes::from(DEFAULT_ERROR_BODY)));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    #[test]
    fn test_response_json() {
        let resp = Response::json(r#"{"status": "ok"}"#);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
    }

    #[test]
    fn test_response_with_status() {
        let resp = Response::text("Not Found").with_status(404);
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn test_server_error_body() {
        assert_eq!(Response::server_error(None).body, "Unknown Server Error Occurred");
        assert_eq!(
            Response::server_error(Some("abc123")).body,
            "Unknown Server Error Occurred Trace Code: abc123"
        );
    }

    #[test]
    fn test_headers_case_insensitive() {
        let resp = Response::text("x").with_header("X-Request-Id", "1");
        assert_eq!(resp.header("x-request-id"), Some("1"));
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let resp = Response::method_not_allowed(&[Method::Get, Method::Head]);
        assert_eq!(resp.status, 405);
        assert_eq!(resp.header("allow"), Some("GET, HEAD"));
    }

    #[test]
    fn test_into_hyper() {
        let resp = Response::text("hi").with_status(201).into_hyper();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
