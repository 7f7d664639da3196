//! # Type System for Route Parameters
//!
//! Cast types for captured path segments and the typed values they
//! convert to.

use crate::error::{Error, Result};
use crate::resolver::Entity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target type a captured segment is cast to
///
/// Default is `String` (no conversion).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastType {
    /// String type (default) - no conversion
    #[default]
    String,
    /// Integer type - parses to i64
    Int,
    /// Float type - parses to f64
    Float,
    /// Boolean type - parses "true"/"false", "1"/"0", "yes"/"no", "on"/"off"
    Bool,
    /// One of a fixed set of string values
    Enum(Vec<String>),
    /// Looked up through a repository by the entity resolver
    Entity,
}

impl CastType {
    /// Parse a shorthand specifier from a route template (e.g. `int` in `{id:int}`).
    ///
    /// Returns the cast together with the regex fragment it implies, or
    /// `None` when the specifier is a raw regex.
    #[must_use]
    pub fn from_specifier(s: &str) -> Option<(Self, &'static str)> {
        match s.to_lowercase().as_str() {
            "int" | "integer" | "i64" | "num" => Some((Self::Int, r"\d+")),
            "float" | "f64" | "number" => Some((Self::Float, r"\d+(?:\.\d+)?")),
            "bool" | "boolean" => Some((Self::Bool, "true|false|1|0")),
            "slug" => Some((Self::String, "[a-z0-9]+(?:-[a-z0-9]+)*")),
            "alpha" => Some((Self::String, "[a-zA-Z]+")),
            "uuid" => Some((
                Self::String,
                "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            )),
            _ => None,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Enum(values) => format!("one of [{}]", values.join(", ")),
            Self::Entity => "entity".to_string(),
        }
    }
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// Converted parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Explicit null default
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (i64)
    Int(i64),
    /// Float value (f64)
    Float(f64),
    /// String value (no conversion performed)
    String(String),
    /// Entity resolved from storage
    Entity(Entity),
}

impl ParamValue {
    /// Get the value as a string
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Entity(entity) => entity.key_string(),
        }
    }

    /// Borrow as `&str` if String variant
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64 if Int variant
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if Float variant
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as bool if Bool variant
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the resolved entity
    #[must_use]
    pub const fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

/// Convert raw string to typed value based on `CastType`
///
/// Entity casts are left as strings; the entity resolver replaces them
/// once storage has been consulted.
///
/// # Errors
///
/// Returns `Error::InvalidParameterValue` if conversion fails.
pub fn convert_param(name: &str, raw: &str, cast: &CastType) -> Result<ParamValue> {
    let invalid = || Error::InvalidParameterValue {
        name: name.to_string(),
        value: raw.to_string(),
        expected: cast.type_name(),
    };

    match cast {
        CastType::String | CastType::Entity => Ok(ParamValue::String(raw.to_string())),
        CastType::Int => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| invalid()),
        CastType::Float => raw.parse::<f64>().map(ParamValue::Float).map_err(|_| invalid()),
        CastType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(ParamValue::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid()),
        },
        CastType::Enum(values) => {
            if values.iter().any(|v| v == raw) {
                Ok(ParamValue::String(raw.to_string()))
            } else {
                Err(invalid())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_from_specifier() {
        assert_eq!(CastType::from_specifier("int").map(|c| c.0), Some(CastType::Int));
        assert_eq!(CastType::from_specifier("INT").map(|c| c.0), Some(CastType::Int));
        assert_eq!(CastType::from_specifier("float").map(|c| c.0), Some(CastType::Float));
        assert_eq!(CastType::from_specifier("bool").map(|c| c.0), Some(CastType::Bool));
        assert_eq!(CastType::from_specifier(r"\d+"), None);
    }

    #[test]
    fn test_convert_string() {
        let result = convert_param("name", "hello", &CastType::String).unwrap();
        assert_eq!(result, ParamValue::String("hello".to_string()));
    }

    #[test]
    fn test_convert_int() {
        assert_eq!(convert_param("id", "123", &CastType::Int).unwrap(), ParamValue::Int(123));
        assert_eq!(convert_param("id", "-456", &CastType::Int).unwrap(), ParamValue::Int(-456));
    }

    #[test]
    fn test_convert_int_invalid() {
        let err = convert_param("id", "abc", &CastType::Int).unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue { ref name, .. } if name == "id"));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_convert_float() {
        let result = convert_param("price", "19.5", &CastType::Float).unwrap();
        assert_eq!(result, ParamValue::Float(19.5));
    }

    #[test]
    fn test_convert_bool() {
        assert_eq!(convert_param("b", "true", &CastType::Bool).unwrap(), ParamValue::Bool(true));
        assert_eq!(convert_param("b", "OFF", &CastType::Bool).unwrap(), ParamValue::Bool(false));
        assert_eq!(convert_param("b", "1", &CastType::Bool).unwrap(), ParamValue::Bool(true));
        assert!(convert_param("b", "maybe", &CastType::Bool).is_err());
    }

    #[test]
    fn test_convert_enum() {
        let cast = CastType::Enum(vec!["draft".to_string(), "published".to_string()]);
        assert_eq!(
            convert_param("status", "draft", &cast).unwrap(),
            ParamValue::String("draft".to_string())
        );
        assert!(convert_param("status", "deleted", &cast).is_err());
    }

    #[test]
    fn test_entity_cast_is_deferred() {
        assert_eq!(
            convert_param("user", "42", &CastType::Entity).unwrap(),
            ParamValue::String("42".to_string())
        );
    }

    #[test]
    fn test_param_value_as_string() {
        assert_eq!(ParamValue::Int(42).as_string(), "42");
        assert_eq!(ParamValue::Float(2.5).as_string(), "2.5");
        assert_eq!(ParamValue::Bool(true).as_string(), "true");
    }
}
