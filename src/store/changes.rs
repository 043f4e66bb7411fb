//! Per-transaction change tracking.
//!
//! Every write that goes through a [`StoreTransaction`](super::StoreTransaction)
//! records the touched row here. Just before the transaction commits the
//! registered commit listeners see these partitions; after a successful commit
//! they see them again and can act on committed data. A rolled-back
//! transaction drops the whole set on the floor.

use super::models::{Follow, Post, TaskRecord, User};
use std::any::Any;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum Row {
    User(User),
    Post(Post),
    Follow(Follow),
    Task(TaskRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    User(i64),
    Post(i64),
    Follow(i64, i64),
    Task(String),
}

impl Row {
    fn key(&self) -> RowKey {
        match self {
            Row::User(user) => RowKey::User(user.id),
            Row::Post(post) => RowKey::Post(post.id),
            Row::Follow(follow) => RowKey::Follow(follow.follower_id, follow.followed_id),
            Row::Task(task) => RowKey::Task(task.id.clone()),
        }
    }
}

enum Change {
    Added(Row),
    Updated(Row),
    Deleted(Row),
}

/// The added/updated/deleted partitions of one transaction's working set.
///
/// A row appears in exactly one partition: the one matching its final state at
/// commit time. A row inserted and then updated in the same transaction is
/// still "added" (with the latest values); a row inserted and then deleted is
/// "deleted".
#[derive(Default)]
pub struct ChangedRows {
    rows: HashMap<RowKey, Change>,
}

impl ChangedRows {
    pub(super) fn record_insert(&mut self, row: Row) {
        let key = row.key();
        let change = match self.rows.remove(&key) {
            // Deleted then re-inserted within the transaction: the net effect
            // on committed state is an update.
            Some(Change::Deleted(_)) => Change::Updated(row),
            _ => Change::Added(row),
        };
        self.rows.insert(key, change);
    }

    pub(super) fn record_update(&mut self, row: Row) {
        let key = row.key();
        let change = match self.rows.remove(&key) {
            Some(Change::Added(_)) => Change::Added(row),
            _ => Change::Updated(row),
        };
        self.rows.insert(key, change);
    }

    pub(super) fn record_delete(&mut self, row: Row) {
        let key = row.key();
        self.rows.insert(key, Change::Deleted(row));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn added(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter_map(|change| match change {
            Change::Added(row) => Some(row),
            _ => None,
        })
    }

    pub fn updated(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter_map(|change| match change {
            Change::Updated(row) => Some(row),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Row> {
        self.rows.values().filter_map(|change| match change {
            Change::Deleted(row) => Some(row),
            _ => None,
        })
    }
}

/// What a commit listener sees around a commit: the change partitions plus a
/// small keyed attachment area, so state captured before the commit can be
/// picked up again after it.
pub struct CommitScope<'a> {
    changes: &'a ChangedRows,
    attachments: &'a mut HashMap<&'static str, Box<dyn Any + Send>>,
}

impl<'a> CommitScope<'a> {
    pub(super) fn new(
        changes: &'a ChangedRows,
        attachments: &'a mut HashMap<&'static str, Box<dyn Any + Send>>,
    ) -> CommitScope<'a> {
        CommitScope {
            changes,
            attachments,
        }
    }

    pub fn changes(&self) -> &ChangedRows {
        self.changes
    }

    pub fn attach<T: Any + Send>(&mut self, key: &'static str, value: T) {
        self.attachments.insert(key, Box::new(value));
    }

    /// Removes and returns the attachment stored under `key`, if any.
    pub fn take<T: Any + Send>(&mut self, key: &'static str) -> Option<T> {
        self.attachments
            .remove(key)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

/// Registered once at startup; called around every store transaction.
pub trait CommitListener: Send + Sync {
    /// Called immediately before the transaction commits. Must not assume the
    /// data will actually land: the commit can still fail.
    fn before_commit(&self, scope: &mut CommitScope);

    /// Called only after the transaction committed successfully.
    fn after_commit(&self, scope: &mut CommitScope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(id: i64, body: &str) -> Row {
        Row::Post(Post {
            id,
            body: body.to_string(),
            timestamp: Utc::now(),
            user_id: 1,
        })
    }

    fn partition_sizes(changes: &ChangedRows) -> (usize, usize, usize) {
        (
            changes.added().count(),
            changes.updated().count(),
            changes.deleted().count(),
        )
    }

    #[test]
    fn test_insert_then_update_stays_added_with_latest_values() {
        let mut changes = ChangedRows::default();
        changes.record_insert(post(1, "first"));
        changes.record_update(post(1, "second"));

        assert_eq!(partition_sizes(&changes), (1, 0, 0));
        let Row::Post(p) = changes.added().next().unwrap() else {
            panic!("expected a post");
        };
        assert_eq!(p.body, "second");
    }

    #[test]
    fn test_insert_then_delete_classifies_as_deleted() {
        let mut changes = ChangedRows::default();
        changes.record_insert(post(1, "gone"));
        changes.record_delete(post(1, "gone"));

        assert_eq!(partition_sizes(&changes), (0, 0, 1));
    }

    #[test]
    fn test_update_then_delete_classifies_as_deleted() {
        let mut changes = ChangedRows::default();
        changes.record_update(post(7, "edited"));
        changes.record_delete(post(7, "edited"));

        assert_eq!(partition_sizes(&changes), (0, 0, 1));
    }

    #[test]
    fn test_attachment_round_trip() {
        let changes = ChangedRows::default();
        let mut attachments = HashMap::new();
        let mut scope = CommitScope::new(&changes, &mut attachments);

        scope.attach("k", vec![1u32, 2, 3]);
        assert_eq!(scope.take::<Vec<u32>>("k"), Some(vec![1, 2, 3]));
        assert_eq!(scope.take::<Vec<u32>>("k"), None);
    }
}
