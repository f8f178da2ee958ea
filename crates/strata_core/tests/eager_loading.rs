use std::sync::Arc;

use strata_core::{
    Connection, ConnectionConfig, ConnectionRegistry, DriverKind, Models, OrmError, Value,
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
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[test]
fn has_many_eager_load_issues_exactly_two_queries() {
    let mut harness = Harness::new();

    let user_rows: Vec<Vec<Value>> = (1..=50)
        .map(|id| vec![Value::Int(id), Value::Text(format!("user-{}", id))])
        .collect();
    harness
        .state
        .script_rows("SELECT * FROM \"users\"", &["id", "name"], user_rows);

    let posts_query = format!(
        "SELECT * FROM \"posts\" WHERE \"user_id\" IN ({})",
        placeholders(50)
    );
    harness.state.script_rows(
        &posts_query,
        &["id", "user_id", "title"],
        vec![
            vec![
                Value::Int(100),
                Value::Int(1),
                Value::Text("first".to_string()),
            ],
            vec![
                Value::Int(101),
                Value::Int(1),
                Value::Text("second".to_string()),
            ],
            vec![
                Value::Int(102),
                Value::Int(7),
                Value::Text("other".to_string()),
            ],
        ],
    );

    let users = harness
        .models
        .query("User")
        .expect("builder")
        .with("posts")
        .get(harness.conn())
        .expect("loads");

    assert_eq!(users.len(), 50);
    assert_eq!(
        harness.state.executed_texts(),
        vec!["SELECT * FROM \"users\"".to_string(), posts_query]
    );

    let first = &users[0];
    let posts = first.loaded("posts").expect("attached").as_many();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].get("title"), Value::Text("first".to_string()));

    let seventh = users.iter().find(|u| u.get("id") == Value::Int(7)).unwrap();
    assert_eq!(seventh.loaded("posts").expect("attached").as_many().len(), 1);

    let empty = users.iter().find(|u| u.get("id") == Value::Int(2)).unwrap();
    assert!(empty.loaded("posts").expect("attached").as_many().is_empty());
}

#[test]
fn morph_to_buckets_parents_per_tag() {
    let mut harness = Harness::new();

    // 10 comments: 6 owned by users (ids 1..3), 4 by posts (ids 10..11).
    let comment_rows: Vec<Vec<Value>> = (0..10)
        .map(|index| {
            let (tag, owner) = if index % 5 < 3 {
                ("user", Value::Int((index % 3) as i64 + 1))
            } else {
                ("post", Value::Int((index % 2) as i64 + 10))
            };
            vec![
                Value::Int(index as i64),
                Value::Text(tag.to_string()),
                owner,
            ]
        })
        .collect();
    harness.state.script_rows(
        "SELECT * FROM \"comments\"",
        &["id", "commentable_type", "commentable_id"],
        comment_rows,
    );

    let users_query = format!(
        "SELECT * FROM \"users\" WHERE \"id\" IN ({})",
        placeholders(3)
    );
    harness.state.script_rows(
        &users_query,
        &["id", "name"],
        vec![
            vec![Value::Int(1), Value::Text("u1".to_string())],
            vec![Value::Int(2), Value::Text("u2".to_string())],
            vec![Value::Int(3), Value::Text("u3".to_string())],
        ],
    );

    let posts_query = format!(
        "SELECT * FROM \"posts\" WHERE \"id\" IN ({})",
        placeholders(2)
    );
    harness.state.script_rows(
        &posts_query,
        &["id", "title"],
        vec![
            vec![Value::Int(10), Value::Text("p10".to_string())],
            vec![Value::Int(11), Value::Text("p11".to_string())],
        ],
    );

    let comments = harness
        .models
        .query("Comment")
        .expect("builder")
        .with("commentable")
        .get(harness.conn())
        .expect("loads");

    // One primary query plus one per distinct morph tag.
    assert_eq!(harness.state.executed_texts().len(), 3);

    for comment in &comments {
        let parent = comment
            .loaded("commentable")
            .expect("attached")
            .as_one()
            .expect("resolved");
        let tag = comment.get("commentable_type");
        match tag {
            Value::Text(ref t) if t == "user" => assert_eq!(parent.class().name(), "User"),
            Value::Text(ref t) if t == "post" => assert_eq!(parent.class().name(), "Post"),
            other => panic!("unexpected tag {:?}", other),
        }
        assert_eq!(parent.get("id"), comment.get("commentable_id"));
    }
}

#[test]
fn morph_to_with_unregistered_tag_is_misconfigured() {
    let mut harness = Harness::new();
    harness.state.script_rows(
        "SELECT * FROM \"comments\"",
        &["id", "commentable_type", "commentable_id"],
        vec![vec![
            Value::Int(1),
            Value::Text("invoice".to_string()),
            Value::Int(5),
        ]],
    );

    let result = harness
        .models
        .query("Comment")
        .expect("builder")
        .with("commentable")
        .get(harness.conn());

    assert!(matches!(result, Err(OrmError::RelationMisconfigured(_))));
}

#[test]
fn dot_paths_recurse_one_batched_query_per_level() {
    let mut harness = Harness::new();

    harness.state.script_rows(
        "SELECT * FROM \"users\"",
        &["id"],
        vec![vec![Value::Int(1)], vec![Value::Int(2)]],
    );

    let posts_query = format!(
        "SELECT * FROM \"posts\" WHERE \"user_id\" IN ({})",
        placeholders(2)
    );
    harness.state.script_rows(
        &posts_query,
        &["id", "user_id"],
        vec![
            vec![Value::Int(10), Value::Int(1)],
            vec![Value::Int(11), Value::Int(2)],
        ],
    );

    let comments_query = format!(
        "SELECT * FROM \"comments\" WHERE \"commentable_type\" = ? AND \"commentable_id\" IN ({})",
        placeholders(2)
    );
    harness.state.script_rows(
        &comments_query,
        &["id", "commentable_type", "commentable_id"],
        vec![vec![
            Value::Int(100),
            Value::Text("post".to_string()),
            Value::Int(10),
        ]],
    );

    let users = harness
        .models
        .query("User")
        .expect("builder")
        .with("posts.comments")
        .get(harness.conn())
        .expect("loads");

    assert_eq!(harness.state.executed_texts().len(), 3);

    let posts = users[0].loaded("posts").expect("attached").as_many();
    let comments = posts[0].loaded("comments").expect("attached").as_many();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].get("id"), Value::Int(100));
}

#[test]
fn cyclic_dot_paths_are_bounded_by_the_visited_set() {
    let mut harness = Harness::new();

    harness.state.script_rows(
        "SELECT * FROM \"users\"",
        &["id"],
        vec![vec![Value::Int(1)]],
    );
    let posts_query = format!(
        "SELECT * FROM \"posts\" WHERE \"user_id\" IN ({})",
        placeholders(1)
    );
    harness.state.script_rows(
        &posts_query,
        &["id", "user_id"],
        vec![vec![Value::Int(10), Value::Int(1)]],
    );
    let owners_query = format!(
        "SELECT * FROM \"users\" WHERE \"id\" IN ({})",
        placeholders(1)
    );
    harness.state.script_rows(
        &owners_query,
        &["id"],
        vec![vec![Value::Int(1)]],
    );

    // users → posts → user → (posts again: already visited, skipped)
    let users = harness
        .models
        .query("User")
        .expect("builder")
        .with("posts.user.posts")
        .get(harness.conn())
        .expect("loads");

    assert_eq!(harness.state.executed_texts().len(), 3);

    let posts = users[0].loaded("posts").expect("attached").as_many();
    let owner = posts[0]
        .loaded("user")
        .expect("attached")
        .as_one()
        .expect("resolved");
    assert_eq!(owner.get("id"), Value::Int(1));
    assert!(owner.loaded("posts").is_none());
}

#[test]
fn belongs_to_many_attaches_pivot_rows() {
    let mut harness = Harness::new();

    harness.state.script_rows(
        "SELECT * FROM \"users\"",
        &["id"],
        vec![vec![Value::Int(1)], vec![Value::Int(2)]],
    );

    let pivot_query = format!(
        "SELECT \"user_id\", \"role_id\" FROM \"user_roles\" WHERE \"user_id\" IN ({})",
        placeholders(2)
    );
    harness.state.script_rows(
        &pivot_query,
        &["user_id", "role_id"],
        vec![
            vec![Value::Int(1), Value::Int(7)],
            vec![Value::Int(1), Value::Int(8)],
            vec![Value::Int(2), Value::Int(7)],
        ],
    );

    let roles_query = format!(
        "SELECT * FROM \"roles\" WHERE \"id\" IN ({})",
        placeholders(2)
    );
    harness.state.script_rows(
        &roles_query,
        &["id", "name"],
        vec![
            vec![Value::Int(7), Value::Text("admin".to_string())],
            vec![Value::Int(8), Value::Text("editor".to_string())],
        ],
    );

    let users = harness
        .models
        .query("User")
        .expect("builder")
        .with("roles")
        .get(harness.conn())
        .expect("loads");

    assert_eq!(harness.state.executed_texts().len(), 3);

    let first_roles = users[0].loaded("roles").expect("attached").as_many();
    assert_eq!(first_roles.len(), 2);
    let pivot = first_roles[0].pivot().expect("pivot row");
    assert_eq!(pivot.get("user_id"), Some(&Value::Int(1)));
    assert_eq!(pivot.get("role_id"), Some(&Value::Int(7)));

    let second_roles = users[1].loaded("roles").expect("attached").as_many();
    assert_eq!(second_roles.len(), 1);
    assert_eq!(
        second_roles[0].get("name"),
        Value::Text("admin".to_string())
    );
    assert_eq!(
        second_roles[0].pivot().expect("pivot row").get("user_id"),
        Some(&Value::Int(2))
    );
}

#[test]
fn lazy_relation_loading_caches_per_record() {
    let mut harness = Harness::new();

    harness.state.script_rows(
        "SELECT * FROM \"users\"",
        &["id"],
        vec![vec![Value::Int(1)]],
    );
    let posts_query = format!(
        "SELECT * FROM \"posts\" WHERE \"user_id\" IN ({})",
        placeholders(1)
    );
    harness.state.script_rows(
        &posts_query,
        &["id", "user_id"],
        vec![vec![Value::Int(10), Value::Int(1)]],
    );

    let mut users = harness
        .models
        .query("User")
        .expect("builder")
        .get(harness.conn())
        .expect("loads");
    let user = &mut users[0];

    let loaded = user.relation(harness.conn(), "posts").expect("loads");
    assert_eq!(loaded.as_many().len(), 1);

    // Second access serves from the record, not the driver.
    user.relation(harness.conn(), "posts").expect("cached");
    assert_eq!(harness.state.executed_texts().len(), 2);
}
