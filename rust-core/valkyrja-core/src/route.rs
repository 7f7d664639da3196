//! # Route Entity
//!
//! Immutable description of a single endpoint. A route is compiled once
//! from its template; the collection stores it, and the matcher hands out
//! clones carrying the captured values of one request.

use crate::error::{Error, Result};
use crate::method::Method;
use crate::parameter::{EntityBinding, Parameter};
use crate::resolver::Entity;
use crate::types::{CastType, ParamValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One piece of a tokenized route template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Split a template into literal text and `{...}` placeholders.
///
/// Braces nest, so quantifiers such as `\d{2,4}` stay inside their
/// placeholder.
pub(crate) fn tokenize(template: &str) -> Result<Vec<Segment<'_>>> {
    let unbalanced = || Error::InvalidRoutePattern {
        pattern: template.to_string(),
        reason: "unbalanced braces".to_string(),
    };

    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in template.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    if start < i {
                        segments.push(Segment::Literal(&template[start..i]));
                    }
                    start = i + 1;
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(unbalanced());
                }
                depth -= 1;
                if depth == 0 {
                    segments.push(Segment::Placeholder(&template[start..i]));
                    start = i + 1;
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(unbalanced());
    }
    if start < template.len() {
        segments.push(Segment::Literal(&template[start..]));
    }
    Ok(segments)
}

/// Ensure one leading slash and no trailing slash (root stays `/`).
fn normalize_template(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/').trim_end_matches('/');
    format!("/{trimmed}")
}

/// Build the anchored regex for a template, or `None` for a static path.
fn compile_pattern(template: &str, parameters: &[Parameter]) -> Result<Option<String>> {
    let segments = tokenize(template)?;
    if !segments.iter().any(|s| matches!(s, Segment::Placeholder(_))) {
        return Ok(None);
    }

    let mut pattern = String::from("^");
    let mut parameters = parameters.iter();

    for segment in segments {
        match segment {
            Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
            Segment::Placeholder(inner) => {
                let parameter = parameters.next().ok_or_else(|| Error::InvalidRoutePattern {
                    pattern: template.to_string(),
                    reason: format!("no parameter declared for placeholder `{inner}`"),
                })?;
                // `^/` alone keeps its slash so the root still matches.
                if parameter.optional && pattern.ends_with('/') && pattern.len() > 2 {
                    pattern.pop();
                    pattern.push_str(&format!("(?:/({}))?", parameter.regex));
                } else if parameter.optional {
                    pattern.push_str(&format!("({})?", parameter.regex));
                } else {
                    pattern.push_str(&format!("({})", parameter.regex));
                }
            }
        }
    }

    pattern.push('$');
    Ok(Some(pattern))
}

/// Route definition plus, on matched clones, the captured values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Path template (e.g. `/users/{id:\d+}`)
    pub path: String,
    /// Unique route name
    #[serde(default)]
    pub name: Option<String>,
    /// Methods this route answers to
    pub methods: Vec<Method>,
    /// Anchored regex for dynamic routes; `None` for static ones
    #[serde(default)]
    pub regex: Option<String>,
    /// Placeholders in template order
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Name of the registered dispatch target
    pub dispatch: String,
    /// Whether a bearer token is required
    #[serde(default)]
    pub auth_required: bool,
    /// Captured values; populated only on matched clones
    #[serde(skip)]
    pub matches: Vec<(String, ParamValue)>,
}

impl Route {
    /// Compile a route answering GET and HEAD.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for unbalanced braces.
    pub fn new(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        let path = normalize_template(path);
        let parameters = tokenize(&path)?
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(inner) => Some(Parameter::from_placeholder(inner)),
                Segment::Literal(_) => None,
            })
            .collect::<Vec<_>>();
        let regex = compile_pattern(&path, &parameters)?;

        Ok(Self {
            path,
            name: None,
            methods: vec![Method::Get, Method::Head],
            regex,
            parameters,
            dispatch: dispatch.into(),
            auth_required: false,
            matches: Vec::new(),
        })
    }

    /// GET route (HEAD is registered alongside)
    ///
    /// # Errors
    ///
    /// See [`Route::new`].
    pub fn get(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        Self::new(path, dispatch)
    }

    /// POST route
    ///
    /// # Errors
    ///
    /// See [`Route::new`].
    pub fn post(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        Ok(Self::new(path, dispatch)?.with_methods([Method::Post]))
    }

    /// PUT route
    ///
    /// # Errors
    ///
    /// See [`Route::new`].
    pub fn put(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        Ok(Self::new(path, dispatch)?.with_methods([Method::Put]))
    }

    /// PATCH route
    ///
    /// # Errors
    ///
    /// See [`Route::new`].
    pub fn patch(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        Ok(Self::new(path, dispatch)?.with_methods([Method::Patch]))
    }

    /// DELETE route
    ///
    /// # Errors
    ///
    /// See [`Route::new`].
    pub fn delete(path: &str, dispatch: impl Into<String>) -> Result<Self> {
        Ok(Self::new(path, dispatch)?.with_methods([Method::Delete]))
    }

    /// Set the route name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the method set (no implicit HEAD)
    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Vec::new();
        for method in methods {
            if !self.methods.contains(&method) {
                self.methods.push(method);
            }
        }
        self
    }

    /// Require a bearer token
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Replace the parameter of the same name and recompile the regex
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(slot) => *slot = parameter,
            None => {
                warn!(route = %self.path, parameter = %parameter.name, "No placeholder for parameter");
                return self;
            }
        }
        self.recompile();
        self
    }

    /// Change only the cast of a parameter
    #[must_use]
    pub fn with_cast(self, name: &str, cast: CastType) -> Self {
        let parameter = self
            .parameter(name)
            .cloned()
            .unwrap_or_else(|| Parameter::new(name));
        self.with_parameter(parameter.with_cast(cast))
    }

    /// Resolve a parameter through storage
    #[must_use]
    pub fn with_entity(self, name: &str, binding: EntityBinding) -> Self {
        let parameter = self
            .parameter(name)
            .cloned()
            .unwrap_or_else(|| Parameter::new(name));
        self.with_parameter(parameter.with_entity(binding))
    }

    fn recompile(&mut self) {
        // Parameters come from this template, so the placeholder count
        // always lines up.
        if let Ok(regex) = compile_pattern(&self.path, &self.parameters) {
            self.regex = regex;
        }
    }

    /// Key under which the collection stores this route
    #[must_use]
    pub fn key(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let methods = self
            .methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join("|");
        format!("{methods} {}", self.path)
    }

    /// Whether the route is matched by regex
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.regex.is_some()
    }

    /// Declared parameter by name
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check methods and parameters.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` without methods, or
    /// `Error::InvalidRouteParameter` for a broken parameter.
    pub fn validate(&self) -> Result<()> {
        if self.methods.is_empty() {
            return Err(Error::InvalidRoutePattern {
                pattern: self.path.clone(),
                reason: "route declares no methods".to_string(),
            });
        }
        for (index, parameter) in self.parameters.iter().enumerate() {
            parameter.validate(&self.path)?;
            if self.parameters[..index].iter().any(|p| p.name == parameter.name) {
                return Err(Error::InvalidRouteParameter {
                    route: self.path.clone(),
                    parameter: parameter.name.clone(),
                    reason: "duplicate parameter name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Captured value by parameter name
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.matches.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a captured parameter as i64
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(ParamValue::as_int)
    }

    /// Get a captured parameter as a resolved entity
    #[must_use]
    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.param(name).and_then(ParamValue::as_entity)
    }

    /// Captured values exposed to the dispatch target
    #[must_use]
    pub fn arguments(&self) -> Vec<(&str, &ParamValue)> {
        self.matches
            .iter()
            .filter(|(name, _)| self.parameter(name).map_or(true, |p| p.capture))
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_route() {
        let route = Route::get("/users", "users.index").unwrap();
        assert_eq!(route.path, "/users");
        assert!(!route.is_dynamic());
        assert!(route.parameters.is_empty());
        assert_eq!(route.methods, vec![Method::Get, Method::Head]);
    }

    #[test]
    fn test_path_is_normalized() {
        let route = Route::get("users/", "users.index").unwrap();
        assert_eq!(route.path, "/users");
        let root = Route::get("/", "home").unwrap();
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_dynamic_route_regex() {
        let route = Route::get(r"/users/{id:\d+}", "users.show").unwrap();
        assert_eq!(route.regex.as_deref(), Some(r"^/users/(\d+)$"));
        assert_eq!(route.parameters.len(), 1);
    }

    #[test]
    fn test_multiple_params() {
        let route = Route::get("/users/{user:int}/posts/{post}", "posts.show").unwrap();
        assert_eq!(route.regex.as_deref(), Some(r"^/users/(\d+)/posts/([^/]+)$"));
        assert_eq!(route.parameters[0].cast, CastType::Int);
        assert_eq!(route.parameters[1].cast, CastType::String);
    }

    #[test]
    fn test_optional_trailing_param() {
        let route = Route::get("/posts/{page?:int}", "posts.index").unwrap();
        assert_eq!(route.regex.as_deref(), Some(r"^/posts(?:/(\d+))?$"));
    }

    #[test]
    fn test_optional_param_at_root_keeps_slash() {
        let route = Route::get("/{page?}", "home").unwrap();
        assert_eq!(route.regex.as_deref(), Some("^/([^/]+)?$"));
    }

    #[test]
    fn test_with_methods_drops_repeats() {
        let route = Route::get("/a", "x")
            .unwrap()
            .with_methods([Method::Get, Method::Post, Method::Get]);
        assert_eq!(route.methods, vec![Method::Get, Method::Post]);
    }

    #[test]
    fn test_literal_is_escaped() {
        let route = Route::get("/files/{name}.json", "files").unwrap();
        assert_eq!(route.regex.as_deref(), Some(r"^/files/([^/]+)\.json$"));
    }

    #[test]
    fn test_nested_braces_in_regex() {
        let route = Route::get(r"/years/{year:\d{4}}", "years").unwrap();
        assert_eq!(route.regex.as_deref(), Some(r"^/years/(\d{4})$"));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(Route::get("/users/{id", "users").is_err());
        assert!(Route::get("/users/id}", "users").is_err());
    }

    #[test]
    fn test_with_parameter_recompiles() {
        let route = Route::get("/users/{id}", "users.show")
            .unwrap()
            .with_parameter(Parameter::new("id").with_regex("[a-f0-9]+"));
        assert_eq!(route.regex.as_deref(), Some("^/users/([a-f0-9]+)$"));
    }

    #[test]
    fn test_key_prefers_name() {
        let route = Route::post("/users", "users.store").unwrap();
        assert_eq!(route.key(), "POST /users");
        assert_eq!(route.with_name("users.store").key(), "users.store");
    }

    #[test]
    fn test_helpers_set_methods() {
        assert_eq!(Route::delete("/a", "x").unwrap().methods, vec![Method::Delete]);
        assert_eq!(Route::patch("/a", "x").unwrap().methods, vec![Method::Patch]);
        assert_eq!(Route::put("/a", "x").unwrap().methods, vec![Method::Put]);
    }

    #[test]
    fn test_validate_rejects_empty_methods() {
        let route = Route::get("/a", "x").unwrap().with_methods([]);
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_arguments_skip_uncaptured() {
        let mut route = Route::get("/teams/{team}/{member}", "members")
            .unwrap()
            .with_parameter(Parameter::new("team").without_capture());
        route.matches = vec![
            ("team".to_string(), ParamValue::String("red".to_string())),
            ("member".to_string(), ParamValue::String("ann".to_string())),
        ];
        let args = route.arguments();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].0, "member");
    }
}
