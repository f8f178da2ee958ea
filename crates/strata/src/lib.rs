//! Facade crate: the core API plus every built-in backend driver, wired
//! together.

pub use strata_core::*;

use std::sync::Arc;

/// A connection registry with all built-in driver factories registered.
pub fn registry() -> ConnectionRegistry {
    let mut registry = ConnectionRegistry::new();
    registry.register_factory(Arc::new(strata_driver_scylla::ScyllaDriverFactory));
    registry.register_factory(Arc::new(strata_driver_sqlite::SqliteDriverFactory));
    registry.register_factory(Arc::new(strata_driver_postgres::PostgresDriverFactory));
    registry.register_factory(Arc::new(strata_driver_mysql::MySqlDriverFactory));
    registry.register_factory(Arc::new(strata_driver_mongodb::MongoDriverFactory));
    registry
}

/// `registry()` initialized from an `{default, connections}` document.
pub fn registry_from_config(config: RegistryConfig) -> OrmResult<ConnectionRegistry> {
    let mut registry = registry();
    registry.initialize(config)?;
    Ok(registry)
}
