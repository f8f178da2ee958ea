use std::sync::Arc;

use indexmap::IndexMap;
use strata_core::{
    Connection, ConnectionConfig, ConnectionRegistry, DriverKind, Models, Record, Value,
};
use strata_test_support::{fixtures, FakeDriverFactory, FakeState};

const CURRENT_IDS: &str = "SELECT \"role_id\" FROM \"user_roles\" WHERE \"user_id\" = ?";

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

    fn parent(&self) -> Record {
        Record::hydrate(
            self.models.get("User").expect("registered"),
            self.models.clone(),
            &["id".to_string()],
            vec![Value::Int(1)],
        )
    }

    fn script_current(&self, ids: &[i64]) {
        self.state.script_rows(
            CURRENT_IDS,
            &["role_id"],
            ids.iter().map(|id| vec![Value::Int(*id)]).collect(),
        );
    }
}

#[test]
fn sync_detaches_then_attaches_the_difference() {
    let mut harness = Harness::new();
    harness.script_current(&[1, 2]);

    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");
    let result = ops
        .sync(harness.conn(), &[Value::Int(2), Value::Int(3)], true)
        .expect("syncs");

    assert_eq!(result.attached, vec![Value::Int(3)]);
    assert_eq!(result.detached, vec![Value::Int(1)]);
    assert!(result.updated.is_empty());

    let executed = harness.state.stats().executed;
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[0].text, CURRENT_IDS);
    assert_eq!(
        executed[1].text,
        "DELETE FROM \"user_roles\" WHERE \"user_id\" = ? AND \"role_id\" IN (?)"
    );
    assert_eq!(executed[1].params, vec![Value::Int(1), Value::Int(1)]);
    assert_eq!(
        executed[2].text,
        "INSERT INTO \"user_roles\" (\"user_id\", \"role_id\") VALUES (?, ?)"
    );
    assert_eq!(executed[2].params, vec![Value::Int(1), Value::Int(3)]);
}

#[test]
fn sync_is_idempotent_once_converged() {
    let mut harness = Harness::new();
    // First call sees {1, 2}; the second call sees the converged {2, 3}.
    harness.script_current(&[1, 2]);
    harness.script_current(&[2, 3]);

    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");
    let ids = [Value::Int(2), Value::Int(3)];

    ops.sync(harness.conn(), &ids, true).expect("first sync");
    let second = ops.sync(harness.conn(), &ids, true).expect("second sync");

    assert!(second.attached.is_empty());
    assert!(second.detached.is_empty());

    // Second sync adds only the membership probe, no writes.
    assert_eq!(harness.state.stats().executed.len(), 4);
}

#[test]
fn sync_without_detach_keeps_missing_rows() {
    let mut harness = Harness::new();
    harness.script_current(&[1, 2]);

    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");
    let result = ops
        .sync(harness.conn(), &[Value::Int(3)], false)
        .expect("syncs");

    assert_eq!(result.attached, vec![Value::Int(3)]);
    assert!(result.detached.is_empty());

    let texts = harness.state.executed_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].starts_with("INSERT INTO \"user_roles\""));
}

#[test]
fn toggle_flips_membership_per_id() {
    let mut harness = Harness::new();
    harness.script_current(&[2, 3]);

    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");
    let result = ops
        .toggle(harness.conn(), &[Value::Int(1), Value::Int(3)])
        .expect("toggles");

    assert_eq!(result.attached, vec![Value::Int(1)]);
    assert_eq!(result.detached, vec![Value::Int(3)]);

    let executed = harness.state.stats().executed;
    assert_eq!(
        executed[1].text,
        "DELETE FROM \"user_roles\" WHERE \"user_id\" = ? AND \"role_id\" IN (?)"
    );
    assert_eq!(
        executed[2].text,
        "INSERT INTO \"user_roles\" (\"user_id\", \"role_id\") VALUES (?, ?)"
    );
}

#[test]
fn detach_without_ids_clears_the_parent() {
    let mut harness = Harness::new();
    harness
        .state
        .script("DELETE FROM \"user_roles\" WHERE \"user_id\" = ?", {
            strata_test_support::FakeOutcome::Affected(4)
        });

    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");
    let detached = ops.detach(harness.conn(), None).expect("detaches all");

    assert_eq!(detached, 4);
    assert_eq!(
        harness.state.executed_texts(),
        vec!["DELETE FROM \"user_roles\" WHERE \"user_id\" = ?".to_string()]
    );
}

#[test]
fn attach_carries_extra_pivot_columns() {
    let mut harness = Harness::new();
    let parent = harness.parent();
    let ops = parent.pivot_ops("roles").expect("belongs-to-many");

    let extra = IndexMap::from([("granted_by".to_string(), Value::Int(9))]);
    ops.attach(harness.conn(), &[Value::Int(5)], &extra)
        .expect("attaches");

    let executed = harness.state.stats().executed;
    assert_eq!(
        executed[0].text,
        "INSERT INTO \"user_roles\" (\"user_id\", \"role_id\", \"granted_by\") VALUES (?, ?, ?)"
    );
    assert_eq!(
        executed[0].params,
        vec![Value::Int(1), Value::Int(5), Value::Int(9)]
    );
}

#[test]
fn where_pivot_constrains_the_membership_probe() {
    let mut harness = Harness::new();
    let filtered = "SELECT \"role_id\" FROM \"user_roles\" WHERE \"user_id\" = ? AND \"tenant\" = ?";
    harness
        .state
        .script_rows(filtered, &["role_id"], vec![vec![Value::Int(2)]]);

    let parent = harness.parent();
    let ops = parent
        .pivot_ops("roles")
        .expect("belongs-to-many")
        .where_pivot("tenant", "=", Value::Text("acme".to_string()));

    let current = ops.current_ids(harness.conn()).expect("probes");
    assert_eq!(current, vec![Value::Int(2)]);

    let executed = harness.state.stats().executed;
    assert_eq!(executed[0].text, filtered);
    assert_eq!(
        executed[0].params,
        vec![Value::Int(1), Value::Text("acme".to_string())]
    );
}
