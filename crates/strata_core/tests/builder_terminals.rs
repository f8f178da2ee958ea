use std::sync::Arc;

use strata_core::{
    Connection, ConnectionConfig, ConnectionRegistry, DriverKind, ModelClass, Models, OrmError,
    Value,
};
use strata_test_support::{fixtures, FakeDriverFactory, FakeState};

struct Harness {
    registry: ConnectionRegistry,
    state: Arc<FakeState>,
    models: Models,
}

impl Harness {
    fn new() -> Self {
        let mut registry = ConnectionRegistry::new();
        let (factory, state) = FakeDriverFactory::shared(DriverKind::Sqlite);
        registry.register_factory(factory);
        registry
            .add(
                "default",
                ConnectionConfig::new("sqlite").with_database(":memory:"),
            )
            .expect("adds connection");

        Self {
            registry,
            state,
            models: fixtures::blog_models(),
        }
    }

    fn conn(&mut self) -> &mut Connection {
        self.registry.get_mut(None).expect("default connection")
    }

    fn with_soft_deletes(&self) -> Arc<ModelClass> {
        let class = ModelClass::builder("Invoice")
            .fillable(&["total"])
            .soft_deletes(true)
            .build();
        self.models.register(class.clone());
        class
    }
}

#[test]
fn find_on_an_absent_key_returns_none() {
    let mut harness = Harness::new();

    let found = harness
        .models
        .query("User")
        .expect("builder")
        .find(harness.conn(), Value::Int(99))
        .expect("runs");
    assert!(found.is_none());

    assert_eq!(
        harness.state.executed_texts(),
        vec!["SELECT * FROM \"users\" WHERE \"id\" = ? LIMIT 1".to_string()]
    );
}

#[test]
fn find_or_fail_raises_record_not_found() {
    let mut harness = Harness::new();

    let result = harness
        .models
        .query("User")
        .expect("builder")
        .find_or_fail(harness.conn(), Value::Int(99));
    assert!(matches!(result, Err(OrmError::RecordNotFound(_))));
}

#[test]
fn find_hydrates_the_matching_record() {
    let mut harness = Harness::new();
    harness.state.script_rows(
        "SELECT * FROM \"users\" WHERE \"id\" = ? LIMIT 1",
        &["id", "name"],
        vec![vec![Value::Int(7), Value::Text("Ada".to_string())]],
    );

    let record = harness
        .models
        .query("User")
        .expect("builder")
        .find(harness.conn(), Value::Int(7))
        .expect("runs")
        .expect("found");

    assert!(record.exists());
    assert!(!record.was_recently_created());
    assert_eq!(record.get("name"), Value::Text("Ada".to_string()));
    assert_eq!(record.get_original("name"), Value::Text("Ada".to_string()));
}

#[test]
fn count_compiles_to_a_single_aggregate_column() {
    let mut harness = Harness::new();
    harness.state.script_rows(
        "SELECT count(*) AS \"aggregate\" FROM \"users\"",
        &["aggregate"],
        vec![vec![Value::Int(42)]],
    );

    let count = harness
        .models
        .query("User")
        .expect("builder")
        .count(harness.conn(), None)
        .expect("counts");
    assert_eq!(count, 42);
}

#[test]
fn exists_is_count_limit_one_compared_to_zero() {
    let mut harness = Harness::new();
    harness.state.script_rows(
        "SELECT count(*) AS \"aggregate\" FROM \"users\" LIMIT 1",
        &["aggregate"],
        vec![vec![Value::Int(1)]],
    );

    let exists = harness
        .models
        .query("User")
        .expect("builder")
        .exists(harness.conn())
        .expect("runs");
    assert!(exists);

    // An unscripted (empty) result reads as absent.
    let exists = harness
        .models
        .query("Post")
        .expect("builder")
        .exists(harness.conn())
        .expect("runs");
    assert!(!exists);
}

#[test]
fn pluck_projects_a_single_column() {
    let mut harness = Harness::new();
    harness.state.script_rows(
        "SELECT \"name\" FROM \"users\"",
        &["name"],
        vec![
            vec![Value::Text("Ada".to_string())],
            vec![Value::Text("Grace".to_string())],
        ],
    );

    let names = harness
        .models
        .query("User")
        .expect("builder")
        .pluck(harness.conn(), "name")
        .expect("plucks");
    assert_eq!(
        names,
        vec![
            Value::Text("Ada".to_string()),
            Value::Text("Grace".to_string())
        ]
    );
}

#[test]
fn soft_delete_classes_scope_selects_to_live_rows() {
    let mut harness = Harness::new();
    harness.with_soft_deletes();

    harness
        .models
        .query("Invoice")
        .expect("builder")
        .get(harness.conn())
        .expect("runs");
    harness
        .models
        .query("Invoice")
        .expect("builder")
        .with_trashed()
        .get(harness.conn())
        .expect("runs");
    harness
        .models
        .query("Invoice")
        .expect("builder")
        .only_trashed()
        .get(harness.conn())
        .expect("runs");

    assert_eq!(
        harness.state.executed_texts(),
        vec![
            "SELECT * FROM \"invoices\" WHERE \"deleted_at\" IS NULL".to_string(),
            "SELECT * FROM \"invoices\"".to_string(),
            "SELECT * FROM \"invoices\" WHERE \"deleted_at\" IS NOT NULL".to_string(),
        ]
    );
}

#[test]
fn builder_delete_on_a_soft_delete_class_rewrites_to_update() {
    let mut harness = Harness::new();
    harness.with_soft_deletes();

    harness
        .models
        .query("Invoice")
        .expect("builder")
        .where_eq("id", 4i64)
        .delete(harness.conn())
        .expect("runs");

    let executed = harness.state.stats().executed;
    assert_eq!(
        executed[0].text,
        "UPDATE \"invoices\" SET \"deleted_at\" = ? WHERE \"id\" = ?"
    );
    assert!(matches!(executed[0].params[0], Value::DateTime(_)));
}

#[test]
fn update_binds_values_then_wheres() {
    let mut harness = Harness::new();

    harness
        .models
        .query("User")
        .expect("builder")
        .where_eq("id", 1i64)
        .update(harness.conn(), [("name", Value::Text("Jane".to_string()))])
        .expect("updates");

    let executed = harness.state.stats().executed;
    assert_eq!(
        executed[0].text,
        "UPDATE \"users\" SET \"name\" = ? WHERE \"id\" = ?"
    );
    assert_eq!(
        executed[0].params,
        vec![Value::Text("Jane".to_string()), Value::Int(1)]
    );
}
