use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub about_me: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Follow {
    pub follower_id: i64,
    pub followed_id: i64,
}

/// Durable record of one launched background job. The id is the job-queue
/// assigned job id, so the row and the queue entry are 1:1.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub complete: bool,
    pub user_id: i64,
}

/// A row type whose designated fields are mirrored into the full-text index.
///
/// The index is named after the relational table, the document id is the row's
/// primary key, and only the declared fields are indexed.
pub trait Searchable {
    const INDEX: &'static str;
    const FIELDS: &'static [&'static str];

    fn document_id(&self) -> i64;
    fn index_fields(&self) -> Vec<(&'static str, String)>;
}

impl Searchable for Post {
    const INDEX: &'static str = "posts";
    const FIELDS: &'static [&'static str] = &["body"];

    fn document_id(&self) -> i64 {
        self.id
    }

    fn index_fields(&self) -> Vec<(&'static str, String)> {
        vec![("body", self.body.clone())]
    }
}
