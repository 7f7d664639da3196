//! # Configuration
//!
//! Application settings loaded from TOML, with environment overrides, and
//! the declarative route table.
//!
//! ```toml
//! debug = false
//!
//! [server]
//! address = "127.0.0.1:8000"
//!
//! [database]
//! url = "sqlite:app.db"
//!
//! [[routes.definitions]]
//! path = "/users/{user:int}"
//! name = "users.show"
//! dispatch = "entity.show"
//!
//! [[routes.definitions.parameters]]
//! name = "user"
//! entity = "users"
//! ```

use crate::collection::{Collection, CollectionCache};
use crate::error::{Error, Result};
use crate::method::Method;
use crate::parameter::EntityBinding;
use crate::route::Route;
use crate::types::{CastType, ParamValue};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Re-raise faults instead of answering 500
    pub debug: bool,
    /// HTTP server
    pub server: ServerConfig,
    /// Tracing output
    pub log: LogConfig,
    /// Entity storage
    pub database: Option<DatabaseConfig>,
    /// Route table
    pub routes: RouteTableConfig,
    /// JWT settings for routes marked `auth`
    pub auth: Option<AuthConfig>,
}

/// HTTP Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout_secs: 30,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Shutdown grace period
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Tracing output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// Database connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:` or `postgres://` URL
    pub url: String,
    /// Pool size
    #[serde(default)]
    pub max_connections: Option<u32>,
}

/// JWT settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 shared secret
    pub secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("secret", &"***").finish()
    }
}

/// Declarative route table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTableConfig {
    /// Compiled collection cache; read when present, written otherwise
    pub cache_path: Option<PathBuf>,
    /// Routes in registration order
    pub definitions: Vec<RouteDefinition>,
}

impl RouteTableConfig {
    /// Build the collection, going through the cache file when configured
    ///
    /// # Errors
    ///
    /// Returns route compilation errors, or cache I/O and format errors.
    pub fn collection(&self) -> Result<Collection> {
        if let Some(path) = &self.cache_path {
            if path.exists() {
                let collection = Collection::from_cache(CollectionCache::load(path)?)?;
                info!(path = %path.display(), routes = collection.len(), "Routes restored from cache");
                return Ok(collection);
            }
        }

        let mut collection = Collection::new();
        for definition in &self.definitions {
            collection.add(definition.clone().into_route()?)?;
        }

        if let Some(path) = &self.cache_path {
            match collection.to_cache().and_then(|cache| cache.save(path)) {
                Ok(()) => info!(path = %path.display(), "Route cache written"),
                Err(e) => warn!(path = %path.display(), error = %e, "Route cache not written"),
            }
        }
        Ok(collection)
    }
}

/// One route in the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Path template
    pub path: String,
    /// Dispatch target name
    pub dispatch: String,
    /// Route name
    #[serde(default)]
    pub name: Option<String>,
    /// Methods; GET and HEAD when empty
    #[serde(default)]
    pub methods: Vec<Method>,
    /// Require a bearer token
    #[serde(default)]
    pub auth: bool,
    /// Overrides for placeholders of `path`
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

/// Overrides for one placeholder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterDefinition {
    /// Placeholder name
    pub name: String,
    /// Regex fragment
    pub regex: Option<String>,
    /// Cast type
    pub cast: Option<CastType>,
    /// Entity (table) to resolve through
    pub entity: Option<String>,
    /// Lookup column for `entity`
    pub column: Option<String>,
    /// Value when the segment is absent
    pub default: Option<ParamValue>,
    /// Hand the value to the dispatch target
    pub capture: Option<bool>,
}

impl RouteDefinition {
    /// Compile into a route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a bad template or
    /// `Error::InvalidRouteParameter` for an override naming no placeholder.
    pub fn into_route(self) -> Result<Route> {
        let mut route = Route::new(&self.path, self.dispatch)?;
        if !self.methods.is_empty() {
            route = route.with_methods(self.methods);
        }
        if let Some(name) = self.name {
            route = route.with_name(name);
        }
        if self.auth {
            route = route.with_auth();
        }

        for definition in self.parameters {
            let mut parameter = route
                .parameter(&definition.name)
                .cloned()
                .ok_or_else(|| Error::InvalidRouteParameter {
                    route: route.path.clone(),
                    parameter: definition.name.clone(),
                    reason: "no such placeholder".to_string(),
                })?;
            if let Some(regex) = definition.regex {
                parameter = parameter.with_regex(regex);
            }
            if let Some(cast) = definition.cast {
                parameter = parameter.with_cast(cast);
            }
            if let Some(entity) = definition.entity {
                let binding = EntityBinding::new(entity);
                let binding = match definition.column {
                    Some(column) => binding.by_column(column),
                    None => binding,
                };
                parameter = parameter.with_entity(binding);
            }
            if let Some(default) = definition.default {
                parameter = parameter.with_default(default);
            }
            if definition.capture == Some(false) {
                parameter = parameter.without_capture();
            }
            route = route.with_parameter(parameter);
        }

        Ok(route)
    }
}

impl AppConfig {
    /// Parse TOML text
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid TOML or unknown shapes.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
        })
    }

    /// Read a TOML file and apply environment overrides
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when the file cannot be read, or `Error::Config`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_from(std::env::vars())?;
        Ok(config)
    }

    /// Apply `VALKYRJA_*` overrides from `vars`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a value that does not parse.
    pub fn apply_env_from<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "VALKYRJA_DEBUG" => {
                    self.debug = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                }
                "VALKYRJA_ADDRESS" => {
                    self.server.address = value.parse().map_err(|e| Error::Config {
                        message: format!("VALKYRJA_ADDRESS `{value}`: {e}"),
                    })?;
                }
                "VALKYRJA_DATABASE_URL" => {
                    let max_connections = self.database.as_ref().and_then(|db| db.max_connections);
                    self.database = Some(DatabaseConfig {
                        url: value,
                        max_connections,
                    });
                }
                "VALKYRJA_LOG_LEVEL" => self.log.level = value,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
debug = true

[server]
address = "0.0.0.0:9000"
max_body_size = 2048

[log]
level = "debug"
json = false

[database]
url = "sqlite::memory:"

[auth]
secret = "s3cret"

[[routes.definitions]]
path = "/users/{user:int}"
name = "users.show"
dispatch = "entity.show"

[[routes.definitions.parameters]]
name = "user"
entity = "users"

[[routes.definitions]]
path = "/posts/{status}"
dispatch = "posts.by_status"
methods = ["GET", "POST"]

[[routes.definitions.parameters]]
name = "status"
cast = { enum = ["draft", "published"] }
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(!config.debug);
        assert_eq!(config.server.address.port(), 8000);
        assert!(config.server.keep_alive);
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.debug);
        assert_eq!(config.server.address.port(), 9000);
        assert_eq!(config.server.max_body_size, 2048);
        assert!(!config.log.json);
        assert_eq!(config.auth.unwrap().secret, "s3cret");
        assert_eq!(config.routes.definitions.len(), 2);
    }

    #[test]
    fn test_definitions_compile() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let collection = config.routes.collection().unwrap();
        assert_eq!(collection.len(), 2);

        let show = collection.get_by_name("users.show").unwrap().unwrap();
        assert!(show.parameters[0].is_entity());
        assert_eq!(show.regex.as_deref(), Some(r"^/users/(\d+)$"));

        let posts = collection.get(r"^/posts/([^/]+)$", Some(Method::Post)).unwrap().unwrap();
        assert_eq!(
            posts.parameters[0].cast,
            CastType::Enum(vec!["draft".to_string(), "published".to_string()])
        );
    }

    #[test]
    fn test_unknown_parameter_override() {
        let definition = RouteDefinition {
            path: "/a/{x}".to_string(),
            dispatch: "a".to_string(),
            name: None,
            methods: Vec::new(),
            auth: false,
            parameters: vec![ParameterDefinition {
                name: "y".to_string(),
                ..ParameterDefinition::default()
            }],
        };
        assert!(matches!(
            definition.into_route(),
            Err(Error::InvalidRouteParameter { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env_from([
                ("VALKYRJA_DEBUG".to_string(), "true".to_string()),
                ("VALKYRJA_ADDRESS".to_string(), "127.0.0.1:7000".to_string()),
                ("VALKYRJA_DATABASE_URL".to_string(), "sqlite:app.db".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        assert!(config.debug);
        assert_eq!(config.server.address.port(), 7000);
        assert_eq!(config.database.unwrap().url, "sqlite:app.db");

        let mut config = AppConfig::default();
        let bad = config.apply_env_from([("VALKYRJA_ADDRESS".to_string(), "nowhere".to_string())]);
        assert!(matches!(bad, Err(Error::Config { .. })));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            AppConfig::from_toml_str("debug = ["),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_collection_cache_written_then_read() {
        let path = std::env::temp_dir().join(format!("valkyrja-config-cache-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.routes.cache_path = Some(path.clone());

        let built = config.routes.collection().unwrap();
        assert!(path.exists());

        config.routes.definitions.clear();
        let restored = config.routes.collection().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(restored.len(), built.len());
        assert!(restored.has_named("users.show"));
    }
}
