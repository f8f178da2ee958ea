use std::sync::Arc;

use strata_core::{
    ConnectionConfig, ConnectionRegistry, DriverKind, OrmError, RegistryConfig,
};
use strata_test_support::FakeDriverFactory;

fn sqlite_config() -> ConnectionConfig {
    ConnectionConfig::new("sqlite").with_database(":memory:")
}

fn registry_with_sqlite() -> (ConnectionRegistry, Arc<strata_test_support::FakeState>) {
    let mut registry = ConnectionRegistry::new();
    let (factory, state) = FakeDriverFactory::shared(DriverKind::Sqlite);
    registry.register_factory(factory);
    (registry, state)
}

#[test]
fn initialize_sets_default_and_adds_in_declared_order() {
    let (mut registry, _) = registry_with_sqlite();

    let config: RegistryConfig = serde_json::from_str(
        r#"{
            "default": "a",
            "connections": {
                "a": {"driver": "sqlite", "database": ":memory:"},
                "b": {"driver": "sqlite", "database": ":memory:"}
            }
        }"#,
    )
    .expect("valid document");

    registry.initialize(config).expect("initializes");

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(registry.get(None).expect("default exists").name(), "a");
}

#[test]
fn default_switching_and_removal_reset() {
    let (mut registry, _) = registry_with_sqlite();
    registry.add("a", sqlite_config()).expect("adds a");
    registry.add("b", sqlite_config()).expect("adds b");
    registry.set_default("a").expect("default a");

    registry.set_default("b").expect("switches default");
    assert_eq!(registry.get(None).expect("b is default").name(), "b");

    registry.remove("b").expect("removes b");
    assert_eq!(registry.default_name(), "default");
    assert!(matches!(registry.get(None), Err(OrmError::NotFound(_))));

    // The named lookup still works for the survivor.
    assert_eq!(registry.get(Some("a")).expect("a exists").name(), "a");
}

#[test]
fn add_rejects_duplicates_and_unknown_drivers() {
    let (mut registry, _) = registry_with_sqlite();
    registry.add("main", sqlite_config()).expect("adds");

    assert!(matches!(
        registry.add("main", sqlite_config()),
        Err(OrmError::AlreadyExists(_))
    ));
    assert!(matches!(
        registry.add("other", ConnectionConfig::new("oracle")),
        Err(OrmError::UnsupportedDriver(_))
    ));
    // Known kind, but no factory registered for it.
    assert!(matches!(
        registry.add("other", ConnectionConfig::new("mysql")),
        Err(OrmError::UnsupportedDriver(_))
    ));

    // Failed adds leave no partial connection behind.
    assert_eq!(registry.len(), 1);
}

#[test]
fn get_missing_name_fails_with_not_found() {
    let (registry, _) = registry_with_sqlite();
    assert!(matches!(
        registry.get(Some("missing")),
        Err(OrmError::NotFound(_))
    ));
}

#[test]
fn test_connection_swallows_errors() {
    let (mut registry, state) = registry_with_sqlite();
    registry.add("main", sqlite_config()).expect("adds");

    assert!(registry.test_connection("main"));
    let stats = state.stats();
    assert_eq!(stats.connect_calls, 1);
    assert_eq!(stats.disconnect_calls, 1);

    state.set_connect_error("refused");
    assert!(!registry.test_connection("main"));
    assert!(!registry.test_connection("missing"));
}

#[test]
fn connect_all_is_fail_fast_and_leaves_survivors_connected() {
    let mut registry = ConnectionRegistry::new();
    let (sqlite_factory, sqlite_state) = FakeDriverFactory::shared(DriverKind::Sqlite);
    let (mysql_factory, mysql_state) = FakeDriverFactory::shared(DriverKind::MySql);
    registry.register_factory(sqlite_factory);
    registry.register_factory(mysql_factory);

    registry.add("first", sqlite_config()).expect("adds first");
    registry
        .add("second", ConnectionConfig::new("mysql").with_username("app"))
        .expect("adds second");

    mysql_state.set_connect_error("refused");
    let error = registry.connect_all().expect_err("second connect fails");
    assert!(matches!(error, OrmError::ConnectionFailed(_)));

    // The first connection connected before the failure and stays up.
    assert_eq!(sqlite_state.stats().connect_calls, 1);
    assert!(registry.get(Some("first")).expect("exists").is_connected());
}

#[test]
fn remove_disconnects_connected_members() {
    let (mut registry, state) = registry_with_sqlite();
    registry.add("main", sqlite_config()).expect("adds");
    registry.connect_all().expect("connects");

    registry.remove("main").expect("removes");
    assert_eq!(state.stats().disconnect_calls, 1);
    assert!(registry.is_empty());
}

#[test]
fn clear_resets_to_an_empty_default_registry() {
    let (mut registry, _) = registry_with_sqlite();
    registry.add("a", sqlite_config()).expect("adds");
    registry.set_default("a").expect("default a");

    registry.clear();
    assert!(registry.is_empty());
    assert_eq!(registry.default_name(), "default");
}
