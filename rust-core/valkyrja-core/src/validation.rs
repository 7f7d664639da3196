//! # Validation Module
//!
//! Structured validation errors for parameter cast failures.

use crate::error::Error;
use serde::Serialize;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Value is invalid type
    InvalidType,
    /// Value is not in allowed set
    InvalidChoice,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    /// Field name (the route parameter)
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create an "invalid type" error
    pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} must be {expected}"),
            field: field_str,
            code: ValidationCode::InvalidType,
        }
    }
}

/// Collection of validation errors
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationErrors {
    /// List of field-level errors
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field error
    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Convert to JSON response body
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"errors":[]}"#.to_string())
    }

    /// Build the errors for a failed parameter cast, if `error` is one
    #[must_use]
    pub fn from_error(error: &Error) -> Option<Self> {
        let Error::InvalidParameterValue {
            name,
            value,
            expected,
        } = error
        else {
            return None;
        };

        let mut errors = Self::new();
        if expected.starts_with("one of") {
            errors.add(FieldError::new(
                name.clone(),
                format!("{name} must be {expected}, got '{value}'"),
                ValidationCode::InvalidChoice,
            ));
        } else {
            errors.add(FieldError::invalid_type(name.clone(), expected));
        }
        Some(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CastType;

    #[test]
    fn test_field_error_invalid_type() {
        let error = FieldError::invalid_type("id", "int");
        assert_eq!(error.field, "id");
        assert_eq!(error.code, ValidationCode::InvalidType);
        assert_eq!(error.message, "id must be int");
    }

    #[test]
    fn test_validation_errors_json() {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::invalid_type("id", "int"));

        let json = errors.to_json();
        assert!(json.contains("\"id\""));
        assert!(json.contains("INVALID_TYPE"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_from_cast_error() {
        let error = Error::InvalidParameterValue {
            name: "status".to_string(),
            value: "gone".to_string(),
            expected: CastType::Enum(vec!["open".to_string()]).type_name(),
        };
        let errors = ValidationErrors::from_error(&error).unwrap();
        assert_eq!(errors.errors[0].code, ValidationCode::InvalidChoice);

        assert!(ValidationErrors::from_error(&Error::Cancelled).is_none());
    }
}
