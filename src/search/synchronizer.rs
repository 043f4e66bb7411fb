//! Keeps the full-text index consistent with the relational store's committed
//! state by listening on transaction commits.
//!
//! The synchronizer captures the searchable slice of a transaction's working
//! set just before commit and mirrors it into the index just after the commit
//! succeeds. The index is therefore never ahead of durable data; a failure
//! while mirroring leaves it behind until the next write to the same entity
//! or an explicit reindex, which is the accepted consistency gap.

use super::{SearchIndex, SearchPage};
use crate::store::{CommitListener, CommitScope, Post, Row, Searchable, SqliteStore};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

const PENDING_CHANGES_KEY: &str = "search.pending_changes";

/// An entity projected down to what the index stores about it.
struct SearchDocument {
    index: &'static str,
    id: i64,
    fields: Vec<(&'static str, String)>,
}

/// The searchable portion of one transaction's change partitions, captured at
/// pre-commit time and consumed exactly once after the commit.
struct PendingChangeSet {
    upserts: Vec<SearchDocument>,
    deletes: Vec<(&'static str, i64)>,
}

impl PendingChangeSet {
    fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

fn as_document(row: &Row) -> Option<SearchDocument> {
    match row {
        Row::Post(post) => Some(SearchDocument {
            index: Post::INDEX,
            id: post.document_id(),
            fields: post.index_fields(),
        }),
        _ => None,
    }
}

fn as_document_ref(row: &Row) -> Option<(&'static str, i64)> {
    match row {
        Row::Post(post) => Some((Post::INDEX, post.document_id())),
        _ => None,
    }
}

/// Mirrors searchable entities into the search index and answers ranked
/// queries. With no index configured every operation is a silent no-op; that
/// is a deployment choice, not a failure.
pub struct IndexSynchronizer {
    index: Option<Arc<dyn SearchIndex>>,
}

impl IndexSynchronizer {
    pub fn new(index: Option<Arc<dyn SearchIndex>>) -> Result<IndexSynchronizer> {
        if let Some(index) = &index {
            index.ensure_index(Post::INDEX, Post::FIELDS)?;
        }
        Ok(IndexSynchronizer { index })
    }

    pub fn enabled(&self) -> bool {
        self.index.is_some()
    }

    /// Ranked ids + total for a query against one index. Disabled index
    /// reports zero matches.
    pub fn search(
        &self,
        index: &str,
        query: &str,
        page: usize,
        per_page: usize,
    ) -> Result<SearchPage> {
        match &self.index {
            Some(search_index) => search_index.query(index, query, page, per_page),
            None => Ok(SearchPage::default()),
        }
    }

    /// Full search flow for posts: ranked ids from the index, then the rows
    /// re-fetched from the store in relevance order. Zero matches
    /// short-circuits without touching the store.
    pub fn search_posts(
        &self,
        store: &SqliteStore,
        query: &str,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Post>, usize)> {
        let ranked = self.search(Post::INDEX, query, page, per_page)?;
        if ranked.total == 0 {
            return Ok((Vec::new(), 0));
        }
        let posts = store.get_posts_by_ids(&ranked.ids)?;
        Ok((posts, ranked.total))
    }

    /// Rebuilds the posts index by upserting every row of the table. Not
    /// incremental and loads the whole table; maintenance use only. Returns
    /// the number of documents written.
    pub fn reindex_posts(&self, store: &SqliteStore) -> Result<usize> {
        let Some(index) = &self.index else {
            return Ok(0);
        };
        let posts = store.all_posts()?;
        let count = posts.len();
        for post in posts {
            index.upsert_document(Post::INDEX, post.document_id(), &post.index_fields())?;
        }
        info!("Reindexed {} posts", count);
        Ok(count)
    }
}

impl CommitListener for IndexSynchronizer {
    fn before_commit(&self, scope: &mut CommitScope) {
        if self.index.is_none() {
            return;
        }
        let changes = scope.changes();
        let pending = PendingChangeSet {
            upserts: changes
                .added()
                .chain(changes.updated())
                .filter_map(as_document)
                .collect(),
            deletes: changes.deleted().filter_map(as_document_ref).collect(),
        };
        // Nothing searchable in this commit: attach nothing, so after_commit
        // stays a no-op and the index sees zero calls.
        if !pending.is_empty() {
            scope.attach(PENDING_CHANGES_KEY, pending);
        }
    }

    fn after_commit(&self, scope: &mut CommitScope) {
        let Some(pending) = scope.take::<PendingChangeSet>(PENDING_CHANGES_KEY) else {
            return;
        };
        let Some(index) = &self.index else {
            return;
        };
        // Indexing failures never reach the caller whose commit already
        // succeeded; the gap closes on the next write or a reindex.
        for document in &pending.upserts {
            if let Err(err) = index.upsert_document(document.index, document.id, &document.fields)
            {
                warn!(
                    "Failed to index document {}/{}: {:#}",
                    document.index, document.id, err
                );
            }
        }
        for (index_name, id) in &pending.deletes {
            if let Err(err) = index.delete_document(index_name, *id) {
                warn!("Failed to remove document {}/{}: {:#}", index_name, id, err);
            }
        }
    }
}
