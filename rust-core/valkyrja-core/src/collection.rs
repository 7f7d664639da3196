//! # Route Collection
//!
//! Indexes routes into static (exact path) and dynamic (regex) buckets per
//! HTTP method, plus a name lookup.
//!
//! ## Layout
//!
//! - `routes`: route key -> route, the canonical store. Every key indexed
//!   in a bucket is present here.
//! - `static`: method -> path -> route key, O(1) lookup.
//! - `dynamic`: method -> ordered (regex, route key) list, scanned in
//!   registration order by the matcher.
//!
//! A route registered for several methods is stored once and indexed once
//! per method. Routes restored from a cache stay serialized until first
//! touched ([`LazyRoute`]).
//!
//! The collection is built once at bootstrap and then shared read-only
//! (`Arc<Collection>`); matching never mutates it.

use crate::error::{Error, Result};
use crate::json::{parse_json, to_json, to_json_pretty};
use crate::method::Method;
use crate::route::Route;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A route that may still be a serialized cache payload
#[derive(Debug, Clone)]
pub struct LazyRoute {
    payload: Option<String>,
    resolved: OnceLock<Arc<Route>>,
}

impl LazyRoute {
    /// Wrap an already built route
    #[must_use]
    pub fn resolved(route: Route) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(Arc::new(route));
        Self {
            payload: None,
            resolved,
        }
    }

    /// Defer deserialization of a cached route
    #[must_use]
    pub fn serialized(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            resolved: OnceLock::new(),
        }
    }

    /// Whether the route has been deserialized
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Deserialize on first access and memoize.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a malformed payload.
    pub fn resolve(&self) -> Result<Arc<Route>> {
        if let Some(route) = self.resolved.get() {
            return Ok(Arc::clone(route));
        }
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| Error::invalid_argument("lazy route has neither value nor payload"))?;
        let route: Route = parse_json(payload)
            .map_err(|e| Error::invalid_argument(format!("malformed cached route: {e}")))?;
        Ok(Arc::clone(self.resolved.get_or_init(|| Arc::new(route))))
    }

    fn payload(&self) -> Result<String> {
        match (&self.payload, self.resolved.get()) {
            (Some(payload), _) => Ok(payload.clone()),
            (None, Some(route)) => to_json(route.as_ref()),
            (None, None) => Err(Error::invalid_argument("lazy route has neither value nor payload")),
        }
    }
}

/// A dynamic bucket entry
#[derive(Debug, Clone)]
pub(crate) struct DynamicEntry {
    pub(crate) pattern: String,
    pub(crate) key: String,
    pub(crate) regex: Regex,
}

/// Serializable snapshot of a collection
///
/// Routes are kept as JSON strings so a restored collection only
/// deserializes the routes it actually serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCache {
    /// Route key -> serialized route
    pub routes: BTreeMap<String, String>,
    /// Method -> path -> route key
    #[serde(rename = "static")]
    pub static_routes: BTreeMap<String, BTreeMap<String, String>>,
    /// Method -> ordered (regex, route key)
    #[serde(rename = "dynamic")]
    pub dynamic_routes: BTreeMap<String, Vec<(String, String)>>,
    /// Route name -> route key
    pub named: BTreeMap<String, String>,
}

impl CollectionCache {
    /// Read a cache file
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read or
    /// `Error::InvalidArgument` if it is not a valid cache.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_json(&content)
    }

    /// Write a cache file
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, to_json_pretty(self)?)?;
        Ok(())
    }
}

/// Route collection
#[derive(Debug, Clone, Default)]
pub struct Collection {
    routes: HashMap<String, LazyRoute>,
    static_routes: HashMap<Method, HashMap<String, String>>,
    dynamic_routes: HashMap<Method, Vec<DynamicEntry>>,
    named: HashMap<String, String>,
}

impl Collection {
    /// Create an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route under every declared method
    ///
    /// Re-adding a key replaces the stored route; its index entries are
    /// rebuilt at the end of each bucket.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRouteParameter` for a misconfigured parameter
    /// or `Error::InvalidRoutePattern` for a regex that does not compile or
    /// whose capture groups do not line up with the parameters.
    pub fn add(&mut self, route: Route) -> Result<()> {
        route.validate()?;
        let key = route.key();
        let compiled = route.regex.as_deref().map(|p| compile(p, &route)).transpose()?;

        if self.routes.contains_key(&key) {
            self.unindex(&key);
        }

        let mut indexed: Vec<Method> = Vec::with_capacity(route.methods.len());
        for method in &route.methods {
            if indexed.contains(method) {
                continue;
            }
            indexed.push(*method);
            match &compiled {
                Some(regex) => self.dynamic_routes.entry(*method).or_default().push(DynamicEntry {
                    pattern: regex.as_str().to_string(),
                    key: key.clone(),
                    regex: regex.clone(),
                }),
                None => {
                    self.static_routes
                        .entry(*method)
                        .or_default()
                        .insert(route.path.clone(), key.clone());
                }
            }
        }

        if let Some(name) = &route.name {
            self.named.insert(name.clone(), key.clone());
        }

        debug!(route = %key, path = %route.path, dynamic = route.is_dynamic(), "Route registered");
        self.routes.insert(key, LazyRoute::resolved(route));
        Ok(())
    }

    fn unindex(&mut self, key: &str) {
        for paths in self.static_routes.values_mut() {
            paths.retain(|_, k| k != key);
        }
        for entries in self.dynamic_routes.values_mut() {
            entries.retain(|entry| entry.key != key);
        }
        self.named.retain(|_, k| k != key);
    }

    /// Look up a route by its static path or dynamic regex.
    ///
    /// Without a method, every method's bucket is consulted.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a malformed cached route.
    pub fn get(&self, path: &str, method: Option<Method>) -> Result<Option<Arc<Route>>> {
        self.key_for(path, method)
            .map(|key| self.route_for_key(key))
            .transpose()
    }

    /// Whether a static path or dynamic regex is registered
    #[must_use]
    pub fn has(&self, path: &str, method: Option<Method>) -> bool {
        self.key_for(path, method).is_some()
    }

    fn key_for(&self, path: &str, method: Option<Method>) -> Option<&str> {
        let methods: Vec<Method> = match method {
            Some(method) => vec![method],
            None => Method::ALL.to_vec(),
        };
        methods.into_iter().find_map(|method| {
            self.static_key(method, path).or_else(|| {
                self.dynamic_entries(method)
                    .iter()
                    .find(|entry| entry.pattern == path)
                    .map(|entry| entry.key.as_str())
            })
        })
    }

    /// Look up a route by name
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a malformed cached route.
    pub fn get_by_name(&self, name: &str) -> Result<Option<Arc<Route>>> {
        self.named
            .get(name)
            .map(|key| self.route_for_key(key))
            .transpose()
    }

    /// Whether a route with this name exists
    #[must_use]
    pub fn has_named(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Static routes for a method, or for all methods
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a malformed cached route.
    pub fn all_static(&self, method: Option<Method>) -> Result<Vec<Arc<Route>>> {
        let mut keys: Vec<&String> = self
            .static_routes
            .iter()
            .filter(|(m, _)| method.map_or(true, |wanted| **m == wanted))
            .flat_map(|(_, paths)| paths.values())
            .collect();
        keys.sort();
        keys.dedup();
        keys.into_iter().map(|key| self.route_for_key(key)).collect()
    }

    /// Dynamic routes for a method (registration order), or for all methods
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a malformed cached route.
    pub fn all_dynamic(&self, method: Option<Method>) -> Result<Vec<Arc<Route>>> {
        let methods: Vec<Method> = match method {
            Some(method) => vec![method],
            None => Method::ALL.to_vec(),
        };
        let mut keys: Vec<&str> = Vec::new();
        for method in methods {
            for entry in self.dynamic_entries(method) {
                if !keys.contains(&entry.key.as_str()) {
                    keys.push(&entry.key);
                }
            }
        }
        keys.into_iter().map(|key| self.route_for_key(key)).collect()
    }

    /// Number of distinct routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn static_key(&self, method: Method, path: &str) -> Option<&str> {
        self.static_routes
            .get(&method)
            .and_then(|paths| paths.get(path))
            .map(String::as_str)
    }

    pub(crate) fn dynamic_entries(&self, method: Method) -> &[DynamicEntry] {
        self.dynamic_routes.get(&method).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn route_for_key(&self, key: &str) -> Result<Arc<Route>> {
        self.routes
            .get(key)
            .ok_or_else(|| Error::invalid_argument(format!("route key `{key}` is indexed but not stored")))?
            .resolve()
    }

    /// Snapshot the collection for a cache file
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if a route cannot be serialized.
    pub fn to_cache(&self) -> Result<CollectionCache> {
        let mut cache = CollectionCache::default();
        for (key, route) in &self.routes {
            cache.routes.insert(key.clone(), route.payload()?);
        }
        for (method, paths) in &self.static_routes {
            cache.static_routes.insert(
                method.as_str().to_string(),
                paths.iter().map(|(p, k)| (p.clone(), k.clone())).collect(),
            );
        }
        for (method, entries) in &self.dynamic_routes {
            cache.dynamic_routes.insert(
                method.as_str().to_string(),
                entries.iter().map(|e| (e.pattern.clone(), e.key.clone())).collect(),
            );
        }
        cache.named = self.named.iter().map(|(n, k)| (n.clone(), k.clone())).collect();
        Ok(cache)
    }

    /// Restore a collection from a cache without deserializing its routes
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if an index points at a missing
    /// route or names an unknown method, or `Error::InvalidRoutePattern`
    /// if a regex does not compile.
    pub fn from_cache(cache: CollectionCache) -> Result<Self> {
        let mut collection = Self::new();
        let ensure_stored = |key: &str| {
            if cache.routes.contains_key(key) {
                Ok(())
            } else {
                Err(Error::invalid_argument(format!("cache indexes unknown route `{key}`")))
            }
        };

        for (method, paths) in &cache.static_routes {
            let method: Method = method.parse()?;
            for (path, key) in paths {
                ensure_stored(key)?;
                collection
                    .static_routes
                    .entry(method)
                    .or_default()
                    .insert(path.clone(), key.clone());
            }
        }
        for (method, entries) in &cache.dynamic_routes {
            let method: Method = method.parse()?;
            for (pattern, key) in entries {
                ensure_stored(key)?;
                let regex = Regex::new(pattern).map_err(|e| Error::InvalidRoutePattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                collection.dynamic_routes.entry(method).or_default().push(DynamicEntry {
                    pattern: pattern.clone(),
                    key: key.clone(),
                    regex,
                });
            }
        }
        for (name, key) in &cache.named {
            ensure_stored(key)?;
            collection.named.insert(name.clone(), key.clone());
        }
        collection.routes = cache
            .routes
            .into_iter()
            .map(|(key, payload)| (key, LazyRoute::serialized(payload)))
            .collect();

        Ok(collection)
    }

    /// Whether the route under `key` has been deserialized
    #[must_use]
    pub fn is_resolved(&self, key: &str) -> bool {
        self.routes.get(key).is_some_and(LazyRoute::is_resolved)
    }
}

fn compile(pattern: &str, route: &Route) -> Result<Regex> {
    let regex = Regex::new(pattern).map_err(|e| Error::InvalidRoutePattern {
        pattern: route.path.clone(),
        reason: e.to_string(),
    })?;
    let groups = regex.captures_len() - 1;
    if groups != route.parameters.len() {
        return Err(Error::InvalidRoutePattern {
            pattern: route.path.clone(),
            reason: format!(
                "{groups} capture groups for {} parameters; use (?:...) inside parameter regexes",
                route.parameters.len()
            ),
        });
    }
    Ok(regex)
}
