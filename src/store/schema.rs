//! SQLite schema for the quill database: users, auth tokens, posts, follows
//! and background task records.

use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const USERS_TABLE_V1: Table = Table {
    name: "users",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("username", SqlType::Text).not_null().unique(),
        Column::new("email", SqlType::Text),
        Column::new("password_hash", SqlType::Text).not_null(),
        Column::new("about_me", SqlType::Text),
        Column::new("last_seen", SqlType::Text).not_null(),
    ],
    indices: &[],
};

const AUTH_TOKENS_TABLE_V1: Table = Table {
    name: "auth_tokens",
    columns: &[
        Column::new("value", SqlType::Text).primary_key(),
        Column::new("user_id", SqlType::Integer)
            .not_null()
            .references("users", "id"),
        Column::new("created", SqlType::Text).not_null(),
    ],
    indices: &[("idx_auth_tokens_user_id", "user_id")],
};

const POSTS_TABLE_V1: Table = Table {
    name: "posts",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("body", SqlType::Text).not_null(),
        Column::new("timestamp", SqlType::Text).not_null(),
        Column::new("user_id", SqlType::Integer)
            .not_null()
            .references("users", "id"),
    ],
    indices: &[
        ("idx_posts_user_id", "user_id"),
        ("idx_posts_timestamp", "timestamp DESC"),
    ],
};

const FOLLOWS_TABLE_V1: Table = Table {
    name: "follows",
    columns: &[
        Column::new("follower_id", SqlType::Integer)
            .not_null()
            .references("users", "id"),
        Column::new("followed_id", SqlType::Integer)
            .not_null()
            .references("users", "id"),
    ],
    indices: &[
        ("idx_follows_follower", "follower_id"),
        ("idx_follows_followed", "followed_id"),
    ],
};

/// Task records: id is the queue-assigned job id (a UUID), `complete` flips
/// false to true exactly once and is never reset.
const TASKS_TABLE_V1: Table = Table {
    name: "tasks",
    columns: &[
        Column::new("id", SqlType::Text).primary_key(),
        Column::new("name", SqlType::Text).not_null(),
        Column::new("description", SqlType::Text).not_null().default("''"),
        Column::new("complete", SqlType::Integer).not_null().default("0"),
        Column::new("user_id", SqlType::Integer)
            .not_null()
            .references("users", "id"),
    ],
    indices: &[("idx_tasks_user_id_name", "user_id, name")],
};

pub const STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        USERS_TABLE_V1,
        AUTH_TOKENS_TABLE_V1,
        POSTS_TABLE_V1,
        FOLLOWS_TABLE_V1,
        TASKS_TABLE_V1,
    ],
    migration: None,
}];
