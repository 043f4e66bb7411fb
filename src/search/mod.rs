mod fts5_index;
mod synchronizer;

pub use fts5_index::Fts5SearchIndex;
pub use synchronizer::IndexSynchronizer;

use anyhow::Result;

/// One page of ranked matches from the index: primary keys in descending
/// relevance order, plus the total number of matches across all pages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub ids: Vec<i64>,
    pub total: usize,
}

/// The full-text mirror of the searchable tables. Documents are keyed by the
/// entity's primary key; upsert replaces an existing document wholesale, so
/// the same call serves insert and update.
pub trait SearchIndex: Send + Sync {
    /// Makes sure the named index exists with the given field set. Called once
    /// per searchable type at startup.
    fn ensure_index(&self, index: &str, fields: &[&'static str]) -> Result<()>;

    fn upsert_document(&self, index: &str, id: i64, fields: &[(&'static str, String)])
        -> Result<()>;

    /// Removing a document that is not there is not an error.
    fn delete_document(&self, index: &str, id: i64) -> Result<()>;

    /// Relevance-ranked query against all fields of the index. `page` is
    /// 1-based.
    fn query(&self, index: &str, text: &str, page: usize, per_page: usize) -> Result<SearchPage>;
}
