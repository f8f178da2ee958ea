use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    Connection, ConnectionConfig, DriverFactory, DriverKind, OrmError, OrmResult, RegistryConfig,
};

/// Sentinel default name. Removing the default connection resets the
/// default back to this.
pub const DEFAULT_CONNECTION: &str = "default";

/// Registry of named connections with lazy driver instantiation.
///
/// One logical registry per process is the application's contract; the
/// registry itself is a plain owned value, so process-wide sharing means
/// wrapping it in whatever synchronization the application already uses.
/// Mutations take `&mut self` and are atomic: a failed `add` leaves no
/// partial connection behind.
pub struct ConnectionRegistry {
    factories: HashMap<DriverKind, Arc<dyn DriverFactory>>,
    connections: IndexMap<String, Connection>,
    default_name: String,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            connections: IndexMap::new(),
            default_name: DEFAULT_CONNECTION.to_string(),
        }
    }

    /// Register (or replace) the factory for one backend kind.
    pub fn register_factory(&mut self, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// Set the default name and add every configured connection in
    /// declaration order.
    pub fn initialize(&mut self, config: RegistryConfig) -> OrmResult<()> {
        self.default_name = config.default;
        for (name, connection_config) in config.connections {
            self.add(name, connection_config)?;
        }
        Ok(())
    }

    /// Create a connection (driver not yet connected) under a unique name.
    pub fn add(&mut self, name: impl Into<String>, config: ConnectionConfig) -> OrmResult<()> {
        let name = name.into();
        if self.connections.contains_key(&name) {
            return Err(OrmError::AlreadyExists(name));
        }

        let kind = DriverKind::from_str(&config.driver)?;
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| OrmError::UnsupportedDriver(config.driver.clone()))?;

        let driver = factory.create(&config)?;
        info!("registered connection '{}' ({})", name, kind);
        self.connections
            .insert(name.clone(), Connection::new(name, config, driver));
        Ok(())
    }

    /// Named or default connection. `None` resolves through the default
    /// name.
    pub fn get(&self, name: Option<&str>) -> OrmResult<&Connection> {
        let name = name.unwrap_or(&self.default_name);
        self.connections
            .get(name)
            .ok_or_else(|| OrmError::NotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: Option<&str>) -> OrmResult<&mut Connection> {
        let name = name.unwrap_or(&self.default_name).to_string();
        self.connections
            .get_mut(&name)
            .ok_or(OrmError::NotFound(name))
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn set_default(&mut self, name: impl Into<String>) -> OrmResult<()> {
        let name = name.into();
        if !self.connections.contains_key(&name) {
            return Err(OrmError::NotFound(name));
        }
        self.default_name = name;
        Ok(())
    }

    /// Disconnect (if connected) and drop the named connection. Removing
    /// the default connection resets the default name to the sentinel.
    pub fn remove(&mut self, name: &str) -> OrmResult<()> {
        let mut connection = self
            .connections
            .shift_remove(name)
            .ok_or_else(|| OrmError::NotFound(name.to_string()))?;

        if connection.is_connected() {
            connection.disconnect()?;
        }
        if self.default_name == name {
            self.default_name = DEFAULT_CONNECTION.to_string();
        }
        info!("removed connection '{}'", name);
        Ok(())
    }

    /// Disconnect everything (best effort) and drop all connections.
    pub fn clear(&mut self) {
        for (name, connection) in self.connections.iter_mut() {
            if connection.is_connected() {
                if let Err(error) = connection.disconnect() {
                    warn!("disconnect of '{}' during clear failed: {}", name, error);
                }
            }
        }
        self.connections.clear();
        self.default_name = DEFAULT_CONNECTION.to_string();
    }

    /// Connect every registered connection in registration order,
    /// fail-fast: the first error is returned and the remainder is left
    /// untouched. Connections established before the failure stay up.
    pub fn connect_all(&mut self) -> OrmResult<()> {
        for connection in self.connections.values_mut() {
            connection.connect()?;
        }
        Ok(())
    }

    pub fn disconnect_all(&mut self) -> OrmResult<()> {
        for connection in self.connections.values_mut() {
            connection.disconnect()?;
        }
        Ok(())
    }

    /// True iff connect-then-disconnect succeeds. Swallows all errors,
    /// including an unknown name.
    pub fn test_connection(&mut self, name: &str) -> bool {
        let Ok(connection) = self.get_mut(Some(name)) else {
            return false;
        };
        match connection.connect().and_then(|_| connection.disconnect()) {
            Ok(()) => true,
            Err(error) => {
                warn!("test of connection '{}' failed: {}", name, error);
                false
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
