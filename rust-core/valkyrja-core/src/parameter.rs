//! # Route Parameters
//!
//! A parameter describes one placeholder of a route template: the regex
//! fragment that captures it, the type it is cast to and, for entity
//! casts, where the entity is looked up.

use crate::error::{Error, Result};
use crate::types::{CastType, ParamValue};
use serde::{Deserialize, Deserializer, Serialize};

/// Regex fragment used when a placeholder declares none
pub const DEFAULT_PARAM_REGEX: &str = "[^/]+";

fn default_regex() -> String {
    DEFAULT_PARAM_REGEX.to_string()
}

const fn default_capture() -> bool {
    true
}

fn present_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<ParamValue>, D::Error> {
    ParamValue::deserialize(deserializer).map(Some)
}

/// Where an entity-typed parameter is looked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBinding {
    /// Entity name (the repository table)
    pub entity: String,
    /// Lookup column; the primary key when absent
    #[serde(default)]
    pub column: Option<String>,
}

impl EntityBinding {
    /// Bind to an entity's primary key
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            column: None,
        }
    }

    /// Bind to a specific column
    #[must_use]
    pub fn by_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// One placeholder of a route template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Placeholder name
    pub name: String,
    /// Regex fragment for the capture group (must not contain capture groups)
    #[serde(default = "default_regex")]
    pub regex: String,
    /// Target type of the captured value
    #[serde(default)]
    pub cast: CastType,
    /// Entity lookup, required when `cast` is `Entity`
    #[serde(default)]
    pub entity: Option<EntityBinding>,
    /// Whether the segment may be absent
    #[serde(default)]
    pub optional: bool,
    /// Value used when the segment is absent
    ///
    /// An explicit `null` default is stored as `null`; no default at all
    /// leaves the field out.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present_default")]
    pub default: Option<ParamValue>,
    /// Whether the value is handed to the dispatch target
    #[serde(default = "default_capture")]
    pub capture: bool,
}

impl Parameter {
    /// A required string parameter matching one path segment
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: default_regex(),
            cast: CastType::String,
            entity: None,
            optional: false,
            default: None,
            capture: true,
        }
    }

    /// Parse the inside of a `{...}` placeholder.
    ///
    /// Accepted forms: `id`, `id:\d+`, `id:int`, `page?`, `page?:int`.
    /// Shorthand specifiers set both the fragment and the cast.
    #[must_use]
    pub fn from_placeholder(inner: &str) -> Self {
        let (head, specifier) = match inner.split_once(':') {
            Some((head, specifier)) => (head, Some(specifier)),
            None => (inner, None),
        };
        let (name, optional) = match head.trim().strip_suffix('?') {
            Some(name) => (name, true),
            None => (head.trim(), false),
        };

        let mut parameter = Self::new(name);
        parameter.optional = optional;

        if let Some(specifier) = specifier {
            if let Some((cast, regex)) = CastType::from_specifier(specifier) {
                parameter.cast = cast;
                parameter.regex = regex.to_string();
            } else {
                parameter.regex = specifier.to_string();
            }
        }

        parameter
    }

    /// Override the regex fragment
    #[must_use]
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }

    /// Override the cast type
    #[must_use]
    pub fn with_cast(mut self, cast: CastType) -> Self {
        self.cast = cast;
        self
    }

    /// Resolve this parameter through storage
    #[must_use]
    pub fn with_entity(mut self, binding: EntityBinding) -> Self {
        self.cast = CastType::Entity;
        self.entity = Some(binding);
        self
    }

    /// Value used when the segment is absent
    #[must_use]
    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Keep the value out of the dispatch target's arguments
    #[must_use]
    pub fn without_capture(mut self) -> Self {
        self.capture = false;
        self
    }

    /// Whether this parameter is resolved through storage
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.cast == CastType::Entity
    }

    /// Check the entity-binding invariant.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRouteParameter` for an entity cast without a
    /// binding, or an empty name.
    pub fn validate(&self, route: &str) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidRouteParameter {
            route: route.to_string(),
            parameter: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("parameter name is empty"));
        }
        if self.is_entity() && self.entity.is_none() {
            return Err(invalid("entity cast requires an entity binding"));
        }
        if self.regex.is_empty() {
            return Err(invalid("regex fragment is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_plain() {
        let p = Parameter::from_placeholder("id");
        assert_eq!(p.name, "id");
        assert_eq!(p.regex, DEFAULT_PARAM_REGEX);
        assert_eq!(p.cast, CastType::String);
        assert!(!p.optional);
    }

    #[test]
    fn test_placeholder_custom_regex() {
        let p = Parameter::from_placeholder(r"id:\d{2,4}");
        assert_eq!(p.regex, r"\d{2,4}");
        assert_eq!(p.cast, CastType::String);
    }

    #[test]
    fn test_placeholder_shorthand() {
        let p = Parameter::from_placeholder("id:int");
        assert_eq!(p.cast, CastType::Int);
        assert_eq!(p.regex, r"\d+");
    }

    #[test]
    fn test_placeholder_optional() {
        let p = Parameter::from_placeholder("page?:int");
        assert_eq!(p.name, "page");
        assert!(p.optional);
        assert_eq!(p.cast, CastType::Int);
    }

    #[test]
    fn test_entity_without_binding_is_invalid() {
        let p = Parameter::new("user").with_cast(CastType::Entity);
        let err = p.validate("/users/{user}").unwrap_err();
        assert!(matches!(err, Error::InvalidRouteParameter { .. }));

        let p = Parameter::new("user").with_entity(EntityBinding::new("users"));
        assert!(p.validate("/users/{user}").is_ok());
    }

    #[test]
    fn test_null_default_survives_serialization() {
        let p = Parameter::from_placeholder("page?").with_default(ParamValue::Null);
        let json = serde_json::to_string(&p).unwrap();
        let restored: Parameter = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.default, Some(ParamValue::Null));

        let p = Parameter::from_placeholder("page?");
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("default"));
        let restored: Parameter = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.default, None);
    }
}
