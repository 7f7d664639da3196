//! # Request Container
//!
//! Request-scoped key/value store. The request handler stashes the final
//! request, the matched route, the response and resolved entities here so
//! middleware and dispatch targets can retrieve them without recomputing.
//!
//! A fresh container is created for every request; it is never shared
//! across requests.

use crate::error::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Key of the request after `RequestReceived` middleware ran
pub const REQUEST_KEY: &str = "request";
/// Key of the matched route
pub const ROUTE_KEY: &str = "route";
/// Key of the final response
pub const RESPONSE_KEY: &str = "response";
/// Key of validated JWT claims
pub const CLAIMS_KEY: &str = "claims";

/// Thread-safe, request-scoped container
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct Container {
    entries: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl Container {
    /// Create a new empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key, replacing any previous entry
    pub fn set_singleton<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.into(), Arc::new(value));
    }

    /// Get a cloned value by key
    ///
    /// # Errors
    ///
    /// Returns `Error::ContainerMissing` if the key is absent or holds
    /// another type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Result<T> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| Error::ContainerMissing {
                key: key.to_string(),
            })
    }

    /// Check if a key exists
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(key)
    }

    /// Get the number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    /// Check if the container is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Container")
            .field("keys", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
