use axum::extract::FromRef;

use crate::search::IndexSynchronizer;
use crate::store::SqliteStore;
use crate::tasks::TaskTracker;
use std::sync::Arc;

pub type GuardedStore = Arc<SqliteStore>;
pub type GuardedSynchronizer = Arc<IndexSynchronizer>;
pub type GuardedTracker = Arc<TaskTracker>;

#[derive(Clone)]
pub struct ServerState {
    pub store: GuardedStore,
    pub synchronizer: GuardedSynchronizer,
    pub tracker: GuardedTracker,
}

impl FromRef<ServerState> for GuardedStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedSynchronizer {
    fn from_ref(input: &ServerState) -> Self {
        input.synchronizer.clone()
    }
}

impl FromRef<ServerState> for GuardedTracker {
    fn from_ref(input: &ServerState) -> Self {
        input.tracker.clone()
    }
}
