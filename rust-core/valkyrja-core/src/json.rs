//! # JSON Serialization Module
//!
//! JSON parsing using simd-json, serialization with serde_json.
//! Route cache payloads and request bodies go through here.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Deserialize a JSON document with simd-json
///
/// simd-json mutates its input, so the string is copied first.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for malformed input
pub fn parse_json<T: DeserializeOwned>(json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(&mut bytes)
}

/// Deserialize a JSON buffer in place
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for malformed input
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes)
        .map_err(|e| Error::invalid_argument(format!("malformed JSON: {e}")))
}

/// Serialize a value to JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Serialize a value to pretty-printed JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be serialized
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::route::Route;
    use std::collections::HashMap;

    #[test]
    fn test_route_payload_round_trip() {
        let route = Route::post("/users/{id:int}", "users.update").unwrap().with_name("users.update");
        let payload = to_json(&route).unwrap();
        let restored: Route = parse_json(&payload).unwrap();
        assert_eq!(restored, route);
        assert_eq!(restored.methods, vec![Method::Post]);
    }

    #[test]
    fn test_parse_bytes_in_place() {
        let mut body = br#"{"name": "ann", "role": "admin"}"#.to_vec();
        let map: HashMap<String, String> = parse_json_bytes(&mut body).unwrap();
        assert_eq!(map.get("role").map(String::as_str), Some("admin"));
    }

    #[test]
    fn test_pretty_output_is_multiline() {
        let map = HashMap::from([("GET".to_string(), "/users".to_string())]);
        assert!(to_json_pretty(&map).unwrap().contains('\n'));
    }

    #[test]
    fn test_malformed_payload() {
        let result: Result<Route> = parse_json("{\"path\": ");
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }
}
