use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Connection configuration value object.
///
/// Immutable once a connection has been created from it; the connection
/// keeps a snapshot. Unknown keys ride in `options` so each driver can
/// recognize its own extras (consistency level, pool size, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend selector: `scylladb`, `mysql`, `postgresql`, `sqlite`, `mongodb`.
    pub driver: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name, or file path for SQLite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Keyspace for the wide-column backend. Falls back to `database`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,

    /// Preferred datacenter for the wide-column backend's load balancing.
    #[serde(default, rename = "localDataCenter", skip_serializing_if = "Option::is_none")]
    pub local_data_center: Option<String>,

    /// Free-form per-driver options.
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ConnectionConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Keyspace if set, else the database name. Wide-column drivers use this.
    pub fn keyspace_or_database(&self) -> Option<&str> {
        self.keyspace.as_deref().or(self.database.as_deref())
    }

    pub fn host_or(&self, default: &str) -> String {
        self.host.clone().unwrap_or_else(|| default.to_string())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

/// Initialization document: `{default, connections}`.
///
/// `connections` preserves declaration order so `ConnectionRegistry::initialize`
/// adds entries in the order they were written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub default: String,

    #[serde(default)]
    pub connections: IndexMap<String, ConnectionConfig>,
}

impl RegistryConfig {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            connections: IndexMap::new(),
        }
    }

    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_registry_document() {
        let doc = serde_json::json!({
            "default": "main",
            "connections": {
                "main": {"driver": "sqlite", "database": ":memory:"},
                "analytics": {
                    "driver": "scylladb",
                    "host": "10.0.0.5",
                    "keyspace": "analytics",
                    "localDataCenter": "dc1",
                    "consistency": "quorum"
                }
            }
        });

        let config: RegistryConfig = serde_json::from_value(doc).expect("valid config");
        assert_eq!(config.default, "main");
        assert_eq!(config.connections.len(), 2);

        let analytics = &config.connections["analytics"];
        assert_eq!(analytics.driver, "scylladb");
        assert_eq!(analytics.local_data_center.as_deref(), Some("dc1"));
        assert_eq!(analytics.option_str("consistency"), Some("quorum"));
        assert_eq!(analytics.keyspace_or_database(), Some("analytics"));
    }

    #[test]
    fn connections_preserve_declaration_order() {
        let config = RegistryConfig::new("a")
            .with_connection("c", ConnectionConfig::new("sqlite"))
            .with_connection("a", ConnectionConfig::new("sqlite"))
            .with_connection("b", ConnectionConfig::new("sqlite"));

        let names: Vec<&str> = config.connections.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
