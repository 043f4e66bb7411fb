//! Quill Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod search;
pub mod server;
pub mod sqlite_persistence;
pub mod store;
pub mod tasks;
pub mod user;

// Re-export commonly used types for convenience
pub use search::{Fts5SearchIndex, IndexSynchronizer, SearchIndex};
pub use server::{make_app, run_server, ServerState};
pub use store::SqliteStore;
pub use tasks::{InProcessJobQueue, TaskTracker, TaskWorker};
