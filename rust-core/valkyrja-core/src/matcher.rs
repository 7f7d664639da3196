//! # Route Matcher
//!
//! Resolves a request path and method to a route.
//!
//! 1. Normalize the path.
//! 2. Exact lookup among the method's static routes.
//! 3. Otherwise scan the method's dynamic routes in registration order;
//!    the first regex that matches wins.
//!
//! Captured groups bind to the route's parameters by position. The stored
//! route is never mutated: every match returns a fresh clone carrying the
//! converted values.

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::method::Method;
use crate::parameter::Parameter;
use crate::route::{tokenize, Route, Segment};
use crate::types::convert_param;
use regex::{Captures, Regex};
use std::sync::Arc;
use tracing::trace;

/// Strip query and fragment, collapse repeated slashes, keep one leading
/// slash and drop the trailing one.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Matches requests against a shared collection
#[derive(Debug, Clone)]
pub struct Matcher {
    collection: Arc<Collection>,
}

impl Matcher {
    /// Create a matcher over a collection
    #[must_use]
    pub fn new(collection: Arc<Collection>) -> Self {
        Self { collection }
    }

    /// Underlying collection
    #[must_use]
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Find the route for `path` and `method`.
    ///
    /// Returns `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameterValue` when a captured value cannot
    /// be cast, or `Error::InvalidArgument` for a malformed cached route.
    pub fn match_route(&self, path: &str, method: Method) -> Result<Option<Route>> {
        let path = normalize_path(path);

        if let Some(key) = self.collection.static_key(method, &path) {
            trace!(path = %path, route = %key, "Static match");
            return Ok(Some(self.collection.route_for_key(key)?.as_ref().clone()));
        }

        for entry in self.collection.dynamic_entries(method) {
            if let Some(captures) = entry.regex.captures(&path) {
                trace!(path = %path, route = %entry.key, "Dynamic match");
                let stored = self.collection.route_for_key(&entry.key)?;
                return bind(&stored, &captures).map(Some);
            }
        }

        Ok(None)
    }

    /// Methods under which `path` would match, for a 405 `Allow` header
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let path = normalize_path(path);
        Method::ALL
            .into_iter()
            .filter(|method| {
                self.collection.static_key(*method, &path).is_some()
                    || self
                        .collection
                        .dynamic_entries(*method)
                        .iter()
                        .any(|entry| entry.regex.is_match(&path))
            })
            .collect()
    }

    /// Build the path of a named route.
    ///
    /// Optional parameters missing from `params` are dropped together with
    /// their leading slash.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for an unknown route, a missing
    /// required parameter or a value its regex rejects.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let route = self
            .collection
            .get_by_name(name)?
            .ok_or_else(|| Error::invalid_argument(format!("no route named `{name}`")))?;

        let mut url = String::new();
        for segment in tokenize(&route.path)? {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Placeholder(inner) => {
                    let placeholder = Parameter::from_placeholder(inner);
                    let parameter = route.parameter(&placeholder.name).unwrap_or(&placeholder);
                    match params.iter().find(|(key, _)| *key == parameter.name) {
                        Some((_, value)) => {
                            check_value(parameter, value)?;
                            url.push_str(value);
                        }
                        None if parameter.optional => {
                            if url.ends_with('/') && url.len() > 1 {
                                url.pop();
                            }
                        }
                        None => {
                            return Err(Error::invalid_argument(format!(
                                "route `{name}` requires parameter `{}`",
                                parameter.name
                            )))
                        }
                    }
                }
            }
        }
        Ok(url)
    }
}

fn bind(stored: &Route, captures: &Captures<'_>) -> Result<Route> {
    let mut route = stored.clone();
    let mut matches = Vec::with_capacity(route.parameters.len());

    for (index, parameter) in route.parameters.iter().enumerate() {
        let raw = captures
            .get(index + 1)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty());
        match (raw, &parameter.default) {
            (Some(raw), _) => matches.push((
                parameter.name.clone(),
                convert_param(&parameter.name, raw, &parameter.cast)?,
            )),
            (None, Some(default)) => matches.push((parameter.name.clone(), default.clone())),
            (None, None) => {}
        }
    }

    route.matches = matches;
    Ok(route)
}

fn check_value(parameter: &Parameter, value: &str) -> Result<()> {
    let anchored = Regex::new(&format!("^(?:{})$", parameter.regex))
        .map_err(|e| Error::invalid_argument(format!("bad regex for `{}`: {e}", parameter.name)))?;
    if anchored.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "value `{value}` does not fit parameter `{}`",
            parameter.name
        )))
    }
}
