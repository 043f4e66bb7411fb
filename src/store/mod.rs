mod changes;
mod models;
mod schema;
mod sqlite_store;

pub use changes::{ChangedRows, CommitListener, CommitScope, Row};
pub use models::{Follow, Post, Searchable, TaskRecord, User};
pub use schema::STORE_VERSIONED_SCHEMAS;
pub use sqlite_store::{SqliteStore, StoreTransaction};
