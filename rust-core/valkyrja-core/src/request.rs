//! # HTTP Request
//!
//! Owned request value handed through the middleware chains and dispatch.
//! Body is collected once; the query string is parsed up front.

use crate::error::{Error, Result};
use crate::json::parse_json_bytes;
use crate::method::Method;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Raw query string (e.g., "page=1&limit=10")
    query_string: Option<String>,
    /// Parsed query parameters
    query_params: HashMap<String, String>,
    /// Request headers
    headers: HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
    /// Peer address, when served over the network
    pub remote_addr: Option<SocketAddr>,
    /// When the request entered the framework
    pub received_at: Instant,
}

impl Request {
    /// Build a request by hand (tests, in-process dispatch)
    ///
    /// `path` may carry a query string.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        let query_params = parse_query_string(query_string.as_deref());

        Self {
            method,
            path,
            query_string,
            query_params,
            headers: HeaderMap::new(),
            body: None,
            remote_addr: None,
            received_at: Instant::now(),
        }
    }

    /// Set a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when the body exceeds the limit, or
    /// `Error::MethodNotAllowed` for a method the router never serves.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self> {
        let received_at = Instant::now();
        let method = Method::from_hyper(req.method()).ok_or_else(|| Error::MethodNotAllowed {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            allowed: Method::ALL.to_vec(),
        })?;

        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);
        let query_params = parse_query_string(query_string.as_deref());

        let headers = req.headers().clone();
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(content_len) = declared {
            if content_len > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: content_len,
                });
            }
        }

        let bytes = BodyExt::collect(req.into_body()).await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            method,
            path,
            query_string,
            query_params,
            headers,
            body: (!bytes.is_empty()).then_some(bytes),
            remote_addr,
            received_at,
        })
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Bearer token from the `Authorization` header
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
    }

    /// Get all headers as a `HashMap`
    #[must_use]
    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Get query parameters
    #[must_use]
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Single query parameter
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a missing or malformed body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let mut bytes = self
            .body_bytes()
            .ok_or_else(|| Error::invalid_argument("request has no body"))?
            .to_vec();
        parse_json_bytes(&mut bytes)
    }

    /// Client identifier for rate limiting.
    ///
    /// The peer IP address. `x-client-ip` is only honored when
    /// `trust_forwarded` is set, i.e. behind a proxy that overwrites it.
    #[must_use]
    pub fn client_key(&self, trust_forwarded: bool) -> String {
        let forwarded = trust_forwarded.then(|| self.header("x-client-ip")).flatten();
        forwarded
            .map(str::to_string)
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Parse query string into a map
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (url_decode(key), url_decode(value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding of query components; invalid escapes are kept verbatim
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
