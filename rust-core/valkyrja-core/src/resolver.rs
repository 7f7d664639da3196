//! # Entity Resolver
//!
//! Replaces captured values of entity-typed parameters with records loaded
//! through a [`Repository`]. A missing record is a 404, not a fault.

use crate::database::DbValue;
use crate::dispatch::BoxFuture;
use crate::error::{Error, Result};
use crate::parameter::Parameter;
use crate::route::Route;
use crate::types::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Column used when a binding names none
pub const PRIMARY_KEY: &str = "id";

/// A record loaded from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name (table)
    pub name: String,
    /// Column values
    pub fields: BTreeMap<String, DbValue>,
}

impl Entity {
    /// Create an entity from its columns
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = (String, DbValue)>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Column value by name
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&DbValue> {
        self.fields.get(field)
    }

    /// Primary key value
    #[must_use]
    pub fn id(&self) -> Option<&DbValue> {
        self.get(PRIMARY_KEY)
    }

    /// Primary key rendered as text, empty when absent
    #[must_use]
    pub fn key_string(&self) -> String {
        self.id().map(DbValue::to_text).unwrap_or_default()
    }
}

/// Storage lookup used by the resolver
pub trait Repository: Send + Sync {
    /// Find one `entity` whose `column` (primary key when `None`) equals
    /// `value`.
    fn find<'a>(
        &'a self,
        entity: &'a str,
        column: Option<&'a str>,
        value: &'a str,
    ) -> BoxFuture<'a, Result<Option<Entity>>>;
}

/// In-memory repository
///
/// Values are compared by their text rendering, the way a URL segment
/// arrives.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<String, Vec<Entity>>>,
    lookups: AtomicUsize,
}

impl MemoryRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under its entity name
    pub fn insert(&self, entity: Entity) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.entry(entity.name.clone()).or_default().push(entity);
    }

    /// Number of `find` calls served
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl Repository for MemoryRepository {
    fn find<'a>(
        &'a self,
        entity: &'a str,
        column: Option<&'a str>,
        value: &'a str,
    ) -> BoxFuture<'a, Result<Option<Entity>>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            let column = column.unwrap_or(PRIMARY_KEY);
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            Ok(records.get(entity).and_then(|rows| {
                rows.iter()
                    .find(|row| row.get(column).is_some_and(|v| v.to_text() == value))
                    .cloned()
            }))
        })
    }
}

/// Entities resolved for one request, keyed by entity name and parameter
/// position
#[derive(Debug, Clone, Default)]
pub struct ResolvedEntities {
    entries: BTreeMap<(String, usize), Entity>,
}

impl ResolvedEntities {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity bound to parameter `index`
    pub fn insert(&mut self, index: usize, entity: Entity) {
        self.entries.insert((entity.name.clone(), index), entity);
    }

    /// Entity bound to parameter `index`
    #[must_use]
    pub fn get(&self, entity: &str, index: usize) -> Option<&Entity> {
        self.entries.get(&(entity.to_string(), index))
    }

    /// Container key for an entity bound to parameter `index`
    #[must_use]
    pub fn container_key(entity: &str, index: usize) -> String {
        format!("entity:{entity}:{index}")
    }

    /// Iterate as `(entity, index, record)`
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &Entity)> {
        self.entries
            .iter()
            .map(|((name, index), entity)| (name.as_str(), *index, entity))
    }

    /// Number of resolved entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was resolved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves entity-typed route parameters
#[derive(Clone)]
pub struct EntityResolver {
    repository: Arc<dyn Repository>,
}

impl EntityResolver {
    /// Create a resolver over a repository
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Load the entity for one captured value.
    ///
    /// # Errors
    ///
    /// Returns `Error::EntityNotFound` when no record matches, or
    /// `Error::InvalidRouteParameter` if `parameter` has no binding.
    pub async fn resolve(&self, route: &Route, parameter: &Parameter, raw: &str) -> Result<Entity> {
        let binding = parameter.entity.as_ref().ok_or_else(|| Error::InvalidRouteParameter {
            route: route.path.clone(),
            parameter: parameter.name.clone(),
            reason: "entity cast requires an entity binding".to_string(),
        })?;
        let column = binding.column.as_deref();

        self.repository
            .find(&binding.entity, column, raw)
            .await?
            .ok_or_else(|| Error::EntityNotFound {
                entity: binding.entity.clone(),
                column: column.unwrap_or(PRIMARY_KEY).to_string(),
                value: raw.to_string(),
            })
    }

    /// Resolve every entity parameter captured on a matched route,
    /// replacing its value in `route.matches`.
    ///
    /// Parameters without a captured value (absent optionals) are skipped.
    ///
    /// # Errors
    ///
    /// Stops at the first lookup that fails; see [`EntityResolver::resolve`].
    pub async fn resolve_route(&self, route: &mut Route, resolved: &mut ResolvedEntities) -> Result<()> {
        let work: Vec<(usize, Parameter, String)> = route
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_entity())
            .filter_map(|(index, p)| {
                route
                    .param(&p.name)
                    .and_then(ParamValue::as_str)
                    .map(|raw| (index, p.clone(), raw.to_string()))
            })
            .collect();

        for (index, parameter, raw) in work {
            let entity = self.resolve(route, &parameter, &raw).await?;
            debug!(entity = %entity.name, parameter = %parameter.name, value = %raw, "Entity resolved");
            if let Some(slot) = route.matches.iter_mut().find(|(name, _)| *name == parameter.name) {
                slot.1 = ParamValue::Entity(entity.clone());
            }
            resolved.insert(index, entity);
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::EntityBinding;

    fn user(id: i64, name: &str) -> Entity {
        Entity::new(
            "users",
            [
                ("id".to_string(), DbValue::Int(id)),
                ("name".to_string(), DbValue::String(name.to_string())),
            ],
        )
    }

    fn repository() -> Arc<MemoryRepository> {
        let repository = Arc::new(MemoryRepository::new());
        repository.insert(user(1, "alice"));
        repository.insert(user(2, "bob"));
        repository
    }

    fn matched(route: Route, values: &[(&str, &str)]) -> Route {
        let mut route = route;
        route.matches = values
            .iter()
            .map(|(n, v)| ((*n).to_string(), ParamValue::String((*v).to_string())))
            .collect();
        route
    }

    #[test]
    fn test_entity_accessors() {
        let entity = user(7, "carol");
        assert_eq!(entity.id(), Some(&DbValue::Int(7)));
        assert_eq!(entity.key_string(), "7");
        assert_eq!(entity.get("name"), Some(&DbValue::String("carol".to_string())));
    }

    #[tokio::test]
    async fn test_memory_find_by_primary_key() {
        let repository = repository();
        let found = repository.find("users", None, "2").await.unwrap();
        assert_eq!(found.unwrap().get("name"), Some(&DbValue::String("bob".to_string())));
        assert!(repository.find("users", None, "9").await.unwrap().is_none());
        assert!(repository.find("posts", None, "1").await.unwrap().is_none());
        assert_eq!(repository.lookups(), 3);
    }

    #[tokio::test]
    async fn test_resolve_route_replaces_value() {
        let resolver = EntityResolver::new(repository());
        let route = Route::get("/users/{user}", "users.show")
            .unwrap()
            .with_entity("user", EntityBinding::new("users"));
        let mut route = matched(route, &[("user", "1")]);
        let mut resolved = ResolvedEntities::new();

        resolver.resolve_route(&mut route, &mut resolved).await.unwrap();

        let entity = route.get_entity("user").unwrap();
        assert_eq!(entity.key_string(), "1");
        assert_eq!(resolved.len(), 1);
        assert!(resolved.get("users", 0).is_some());
        assert_eq!(ResolvedEntities::container_key("users", 0), "entity:users:0");
    }

    #[tokio::test]
    async fn test_resolve_by_column() {
        let resolver = EntityResolver::new(repository());
        let route = Route::get("/users/{user}", "users.show")
            .unwrap()
            .with_entity("user", EntityBinding::new("users").by_column("name"));
        let mut route = matched(route, &[("user", "bob")]);
        let mut resolved = ResolvedEntities::new();

        resolver.resolve_route(&mut route, &mut resolved).await.unwrap();
        assert_eq!(route.get_entity("user").unwrap().key_string(), "2");
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let resolver = EntityResolver::new(repository());
        let route = Route::get("/users/{user}", "users.show")
            .unwrap()
            .with_entity("user", EntityBinding::new("users"));
        let mut route = matched(route, &[("user", "42")]);

        let err = resolver
            .resolve_route(&mut route, &mut ResolvedEntities::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityNotFound { ref value, .. } if value == "42"));
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_same_entity_twice_keyed_by_position() {
        let repository = repository();
        let resolver = EntityResolver::new(repository.clone());
        let route = Route::get("/users/{a}/follows/{b}", "follows")
            .unwrap()
            .with_entity("a", EntityBinding::new("users"))
            .with_entity("b", EntityBinding::new("users"));
        let mut route = matched(route, &[("a", "1"), ("b", "2")]);
        let mut resolved = ResolvedEntities::new();

        resolver.resolve_route(&mut route, &mut resolved).await.unwrap();

        assert_eq!(resolved.get("users", 0).unwrap().key_string(), "1");
        assert_eq!(resolved.get("users", 1).unwrap().key_string(), "2");
        assert_eq!(repository.lookups(), 2);
    }

    #[tokio::test]
    async fn test_absent_optional_entity_is_skipped() {
        let repository = repository();
        let resolver = EntityResolver::new(repository.clone());
        let route = Route::get("/users/{user?}", "users.maybe")
            .unwrap()
            .with_entity("user", EntityBinding::new("users"));
        let mut route = matched(route, &[]);
        let mut resolved = ResolvedEntities::new();

        resolver.resolve_route(&mut route, &mut resolved).await.unwrap();
        assert!(resolved.is_empty());
        assert_eq!(repository.lookups(), 0);
    }
}
