//! Shared model fixtures for contract tests: a small blog domain with
//! every relation shape the engine supports.

use strata_core::{BelongsToManyDef, ModelClass, Models};

/// `User` has many `Post`s, belongs to many `Role`s through `user_roles`,
/// and owns polymorphic `Comment`s. `Comment.commentable` morphs back to
/// `User` or `Post`.
pub fn blog_models() -> Models {
    let models = Models::new();

    models.register(
        ModelClass::builder("User")
            .fillable(&["name", "email", "active"])
            .has_many("posts", "Post", "user_id", "id")
            .morph_many("comments", "Comment", "commentable", "id")
            .belongs_to_many(
                "roles",
                BelongsToManyDef {
                    related: "Role".to_string(),
                    pivot_table: "user_roles".to_string(),
                    foreign_pivot_key: "user_id".to_string(),
                    related_pivot_key: "role_id".to_string(),
                    parent_key: "id".to_string(),
                    related_key: "id".to_string(),
                    pivot_columns: Vec::new(),
                },
            )
            .build(),
    );

    models.register(
        ModelClass::builder("Post")
            .fillable(&["user_id", "title", "body"])
            .belongs_to("user", "User", "user_id", "id")
            .morph_many("comments", "Comment", "commentable", "id")
            .build(),
    );

    models.register(
        ModelClass::builder("Comment")
            .fillable(&["body", "commentable_type", "commentable_id"])
            .morph_to(
                "commentable",
                "commentable",
                "id",
                &[("user", "User"), ("post", "Post")],
            )
            .build(),
    );

    models.register(ModelClass::builder("Role").fillable(&["name"]).build());

    models
}
