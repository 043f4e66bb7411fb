//! FTS5-backed search index using SQLite's full-text search.

use super::{SearchIndex, SearchPage};
use anyhow::{bail, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// One FTS5 virtual table per declared index, all living in a dedicated
/// search database file, separate from the relational store. bm25 provides
/// the relevance ranking.
pub struct Fts5SearchIndex {
    conn: Mutex<Connection>,
    /// Declared field names per index, fixed at ensure_index time.
    fields: Mutex<HashMap<String, Vec<&'static str>>>,
}

impl Fts5SearchIndex {
    pub fn new(db_path: &Path) -> Result<Fts5SearchIndex> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::with_connection(conn))
    }

    pub fn new_in_memory() -> Result<Fts5SearchIndex> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Fts5SearchIndex {
        Fts5SearchIndex {
            conn: Mutex::new(conn),
            fields: Mutex::new(HashMap::new()),
        }
    }

    fn table_name(index: &str) -> String {
        format!("fts_{}", index)
    }

    fn declared_fields(&self, index: &str) -> Result<Vec<&'static str>> {
        match self.fields.lock().unwrap().get(index) {
            Some(fields) => Ok(fields.clone()),
            None => bail!("Unknown search index '{}'", index),
        }
    }

    /// FTS5 treats bare punctuation as query syntax, so every whitespace
    /// separated term is wrapped in double quotes (with embedded quotes
    /// doubled). Terms are ANDed, FTS5's default.
    fn escape_query(text: &str) -> String {
        text.split_whitespace()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl SearchIndex for Fts5SearchIndex {
    fn ensure_index(&self, index: &str, fields: &[&'static str]) -> Result<()> {
        let table = Self::table_name(index);
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5(
                doc_id UNINDEXED,
                {},
                tokenize='unicode61'
            );",
            table,
            fields.join(", ")
        ))?;
        self.fields
            .lock()
            .unwrap()
            .insert(index.to_string(), fields.to_vec());
        debug!("FTS5 index '{}' ready with fields [{}]", index, fields.join(", "));
        Ok(())
    }

    fn upsert_document(
        &self,
        index: &str,
        id: i64,
        fields: &[(&'static str, String)],
    ) -> Result<()> {
        let declared = self.declared_fields(index)?;
        let table = Self::table_name(index);
        let conn = self.conn.lock().unwrap();

        // Delete-then-insert keeps the upsert idempotent: the newest values
        // fully replace whatever document was there.
        conn.execute(
            &format!("DELETE FROM {} WHERE doc_id = ?1", table),
            rusqlite::params![id],
        )?;

        let columns = declared.join(", ");
        let placeholders = (0..declared.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} (doc_id, {}) VALUES (?1, {})",
            table, columns, placeholders
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(id)];
        for name in &declared {
            let value = fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            values.push(Box::new(value));
        }
        let value_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, value_refs.as_slice())?;
        Ok(())
    }

    fn delete_document(&self, index: &str, id: i64) -> Result<()> {
        let table = Self::table_name(index);
        let conn = self.conn.lock().unwrap();
        // Zero affected rows is fine: the document may never have existed.
        conn.execute(
            &format!("DELETE FROM {} WHERE doc_id = ?1", table),
            rusqlite::params![id],
        )?;
        Ok(())
    }

    fn query(&self, index: &str, text: &str, page: usize, per_page: usize) -> Result<SearchPage> {
        let table = Self::table_name(index);
        let match_expr = Self::escape_query(text);
        if match_expr.is_empty() {
            return Ok(SearchPage::default());
        }
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {table} MATCH ?1"),
            rusqlite::params![match_expr],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            // bm25 is smaller for better matches, so ascending order yields
            // descending relevance.
            "SELECT doc_id FROM {table} WHERE {table} MATCH ?1
             ORDER BY bm25({table}) LIMIT ?2 OFFSET ?3"
        ))?;
        let ids = stmt
            .query_map(
                rusqlite::params![
                    match_expr,
                    per_page as i64,
                    (page.saturating_sub(1) * per_page) as i64
                ],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<rusqlite::Result<_>>()?;

        Ok(SearchPage {
            ids,
            total: total as usize,
        })
    }
}
