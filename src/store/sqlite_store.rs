use super::changes::{ChangedRows, CommitListener, CommitScope, Row};
use super::models::{Follow, Post, TaskRecord, User};
use super::schema::STORE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

/// The relational store: source of truth for users, posts, follows and task
/// records.
///
/// All writes go through [`SqliteStore::transaction`], which fires the
/// registered commit listeners with the transaction's change partitions:
/// pre-commit for capture, post-commit (only on success) for mirroring.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<SqliteStore> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();
        let conn = Connection::open(path).context("Failed to open quill database")?;
        if is_new_db {
            info!("Creating new quill database at {:?}", path);
        }
        Self::init(conn, is_new_db)
    }

    pub fn new_in_memory() -> Result<SqliteStore> {
        Self::init(Connection::open_in_memory()?, true)
    }

    fn init(conn: Connection, is_new_db: bool) -> Result<SqliteStore> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        let schema = STORE_VERSIONED_SCHEMAS
            .last()
            .expect("at least one schema version");
        if is_new_db {
            schema.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version != schema.version as i64 {
                bail!(
                    "Unsupported quill database version {} (expected {})",
                    db_version,
                    schema.version
                );
            }
            schema
                .validate(&conn)
                .context("Quill database schema validation failed")?;
        }
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Subscribes a listener to every subsequent transaction's commit hooks.
    /// Meant to be called once per listener at process startup.
    pub fn register_commit_listener(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Runs `f` inside a transaction. If `f` returns an error the transaction
    /// rolls back and no listener runs. Otherwise listeners get their
    /// pre-commit look at the change partitions, the transaction commits, and
    /// only then the post-commit callbacks run. A commit failure after the
    /// pre-commit callbacks leaves listeners silent, so nothing is mirrored
    /// for data that never became durable.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreTransaction) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut store_tx = StoreTransaction {
            tx,
            changes: ChangedRows::default(),
        };
        let out = f(&mut store_tx)?;
        let StoreTransaction { tx, changes } = store_tx;

        let listeners = self.listeners.read().unwrap();
        let mut attachments: HashMap<&'static str, Box<dyn Any + Send>> = HashMap::new();
        for listener in listeners.iter() {
            listener.before_commit(&mut CommitScope::new(&changes, &mut attachments));
        }
        tx.commit()?;
        for listener in listeners.iter() {
            listener.after_commit(&mut CommitScope::new(&changes, &mut attachments));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        query_user(&conn, user_id)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .prepare(
                "SELECT id, username, email, password_hash, about_me, last_seen
                 FROM users WHERE username = ?1",
            )?
            .query_row(params![username], row_to_user)
            .optional()
            .map_err(Into::into);
        result
    }

    /// Resolves a bearer token to its user, or None for an unknown token.
    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .prepare(
                "SELECT u.id, u.username, u.email, u.password_hash, u.about_me, u.last_seen
                 FROM users u JOIN auth_tokens t ON t.user_id = u.id
                 WHERE t.value = ?1",
            )?
            .query_row(params![token], row_to_user)
            .optional()
            .map_err(Into::into);
        result
    }

    pub fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let conn = self.conn.lock().unwrap();
        query_post(&conn, post_id)
    }

    /// All posts, newest first. Used by the reindex path; loads the whole
    /// table, so keep it out of request serving.
    pub fn all_posts(&self) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, body, timestamp, user_id FROM posts ORDER BY timestamp DESC",
        )?;
        let posts = stmt
            .query_map([], row_to_post)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(posts)
    }

    /// All posts paginated, newest first.
    pub fn get_posts(&self, page: usize, per_page: usize) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, body, timestamp, user_id FROM posts
             ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
        )?;
        let posts = stmt
            .query_map(
                params![
                    per_page as i64,
                    (page.saturating_sub(1) * per_page) as i64
                ],
                row_to_post,
            )?
            .collect::<rusqlite::Result<_>>()?;
        Ok(posts)
    }

    pub fn get_user_posts(&self, user_id: i64) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, body, timestamp, user_id FROM posts
             WHERE user_id = ?1 ORDER BY timestamp DESC",
        )?;
        let posts = stmt
            .query_map(params![user_id], row_to_post)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(posts)
    }

    /// The user's own posts plus posts of everyone they follow, newest first.
    pub fn get_feed(&self, user_id: i64, page: usize, per_page: usize) -> Result<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, body, timestamp, user_id FROM posts
             WHERE user_id = ?1
                OR user_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)
             ORDER BY timestamp DESC LIMIT ?2 OFFSET ?3",
        )?;
        let posts = stmt
            .query_map(
                params![
                    user_id,
                    per_page as i64,
                    (page.saturating_sub(1) * per_page) as i64
                ],
                row_to_post,
            )?
            .collect::<rusqlite::Result<_>>()?;
        Ok(posts)
    }

    /// Fetches the given posts preserving the order of `ids`. The caller's id
    /// list is the ranking authority (it comes from the search index), so the
    /// rows are ordered by their position in it, not by any table column.
    pub fn get_posts_by_ids(&self, ids: &[i64]) -> Result<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut ordering = String::from("CASE id ");
        for _ in ids {
            ordering.push_str("WHEN ? THEN ? ");
        }
        ordering.push_str("END");
        let sql = format!(
            "SELECT id, body, timestamp, user_id FROM posts
             WHERE id IN ({placeholders}) ORDER BY {ordering}"
        );

        let mut sql_params: Vec<i64> = ids.to_vec();
        for (position, id) in ids.iter().enumerate() {
            sql_params.push(*id);
            sql_params.push(position as i64);
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(rusqlite::params_from_iter(sql_params.iter()), row_to_post)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(posts)
    }

    pub fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
                params![follower_id, followed_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn follower_count(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE followed_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn following_count(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        query_task(&conn, task_id)
    }

    pub fn get_user_tasks(&self, user_id: i64) -> Result<Vec<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, complete, user_id FROM tasks WHERE user_id = ?1",
        )?;
        let tasks = stmt
            .query_map(params![user_id], row_to_task)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tasks)
    }

    /// First incomplete task with the given name for the user, if any. The
    /// advisory pre-launch check: callers use this to avoid double-submitting
    /// a job, accepting the small race between check and launch.
    pub fn get_task_in_progress(&self, user_id: i64, name: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .prepare(
                "SELECT id, name, description, complete, user_id FROM tasks
                 WHERE user_id = ?1 AND name = ?2 AND complete = 0 LIMIT 1",
            )?
            .query_row(params![user_id, name], row_to_task)
            .optional()
            .map_err(Into::into);
        result
    }
}

/// Typed write operations for one open transaction. Every mutation records the
/// touched row so commit listeners can partition the working set.
pub struct StoreTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    changes: ChangedRows,
}

impl StoreTransaction<'_> {
    pub fn create_user(
        &mut self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        let last_seen = Utc::now();
        self.tx.execute(
            "INSERT INTO users (username, email, password_hash, last_seen)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, email, password_hash, last_seen.to_rfc3339()],
        )?;
        let user = User {
            id: self.tx.last_insert_rowid(),
            username: username.to_string(),
            email: email.map(str::to_string),
            password_hash: password_hash.to_string(),
            about_me: None,
            last_seen,
        };
        self.changes.record_insert(Row::User(user.clone()));
        Ok(user)
    }

    pub fn update_about_me(&mut self, user_id: i64, about_me: &str) -> Result<Option<User>> {
        let Some(mut user) = query_user(&self.tx, user_id)? else {
            return Ok(None);
        };
        self.tx.execute(
            "UPDATE users SET about_me = ?1 WHERE id = ?2",
            params![about_me, user_id],
        )?;
        user.about_me = Some(about_me.to_string());
        self.changes.record_update(Row::User(user.clone()));
        Ok(Some(user))
    }

    pub fn touch_last_seen(&mut self, user_id: i64) -> Result<()> {
        let Some(mut user) = query_user(&self.tx, user_id)? else {
            return Ok(());
        };
        let now = Utc::now();
        self.tx.execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), user_id],
        )?;
        user.last_seen = now;
        self.changes.record_update(Row::User(user));
        Ok(())
    }

    pub fn insert_auth_token(&mut self, user_id: i64, value: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO auth_tokens (value, user_id, created) VALUES (?1, ?2, ?3)",
            params![value, user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_auth_token(&mut self, value: &str) -> Result<bool> {
        let deleted = self
            .tx
            .execute("DELETE FROM auth_tokens WHERE value = ?1", params![value])?;
        Ok(deleted > 0)
    }

    pub fn create_post(&mut self, user_id: i64, body: &str) -> Result<Post> {
        let timestamp = Utc::now();
        self.tx.execute(
            "INSERT INTO posts (body, timestamp, user_id) VALUES (?1, ?2, ?3)",
            params![body, timestamp.to_rfc3339(), user_id],
        )?;
        let post = Post {
            id: self.tx.last_insert_rowid(),
            body: body.to_string(),
            timestamp,
            user_id,
        };
        self.changes.record_insert(Row::Post(post.clone()));
        Ok(post)
    }

    pub fn update_post(&mut self, post_id: i64, body: &str) -> Result<Option<Post>> {
        let Some(mut post) = query_post(&self.tx, post_id)? else {
            return Ok(None);
        };
        self.tx.execute(
            "UPDATE posts SET body = ?1 WHERE id = ?2",
            params![body, post_id],
        )?;
        post.body = body.to_string();
        self.changes.record_update(Row::Post(post.clone()));
        Ok(Some(post))
    }

    pub fn delete_post(&mut self, post_id: i64) -> Result<Option<Post>> {
        let Some(post) = query_post(&self.tx, post_id)? else {
            return Ok(None);
        };
        self.tx
            .execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
        self.changes.record_delete(Row::Post(post.clone()));
        Ok(Some(post))
    }

    /// Returns false if the follow relation already existed.
    pub fn follow(&mut self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let exists: Option<i64> = self
            .tx
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
                params![follower_id, followed_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(false);
        }
        self.tx.execute(
            "INSERT INTO follows (follower_id, followed_id) VALUES (?1, ?2)",
            params![follower_id, followed_id],
        )?;
        self.changes.record_insert(Row::Follow(Follow {
            follower_id,
            followed_id,
        }));
        Ok(true)
    }

    pub fn unfollow(&mut self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let deleted = self.tx.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
        )?;
        if deleted > 0 {
            self.changes.record_delete(Row::Follow(Follow {
                follower_id,
                followed_id,
            }));
        }
        Ok(deleted > 0)
    }

    /// Inserts a task record into this transaction's working set. Commit
    /// timing stays with the caller.
    pub fn insert_task(&mut self, task: &TaskRecord) -> Result<()> {
        self.tx.execute(
            "INSERT INTO tasks (id, name, description, complete, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.id,
                task.name,
                task.description,
                task.complete as i64,
                task.user_id
            ],
        )?;
        self.changes.record_insert(Row::Task(task.clone()));
        Ok(())
    }

    /// Flips the task's completion flag to true. Monotonic: never resets.
    /// Returns false if no such task row exists (yet).
    pub fn complete_task(&mut self, task_id: &str) -> Result<bool> {
        let Some(mut task) = query_task(&self.tx, task_id)? else {
            return Ok(false);
        };
        self.tx.execute(
            "UPDATE tasks SET complete = 1 WHERE id = ?1",
            params![task_id],
        )?;
        task.complete = true;
        self.changes.record_update(Row::Task(task));
        Ok(true)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let last_seen: String = row.get("last_seen")?;
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        about_me: row.get("about_me")?,
        last_seen: parse_datetime(&last_seen),
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let timestamp: String = row.get("timestamp")?;
    Ok(Post {
        id: row.get("id")?,
        body: row.get("body")?,
        timestamp: parse_datetime(&timestamp),
        user_id: row.get("user_id")?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
    let complete: i64 = row.get("complete")?;
    Ok(TaskRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        complete: complete != 0,
        user_id: row.get("user_id")?,
    })
}

fn query_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    conn.prepare(
        "SELECT id, username, email, password_hash, about_me, last_seen
         FROM users WHERE id = ?1",
    )?
    .query_row(params![user_id], row_to_user)
    .optional()
    .map_err(Into::into)
}

fn query_post(conn: &Connection, post_id: i64) -> Result<Option<Post>> {
    conn.prepare("SELECT id, body, timestamp, user_id FROM posts WHERE id = ?1")?
        .query_row(params![post_id], row_to_post)
        .optional()
        .map_err(Into::into)
}

fn query_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>> {
    conn.prepare("SELECT id, name, description, complete, user_id FROM tasks WHERE id = ?1")?
        .query_row(params![task_id], row_to_task)
        .optional()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteStore {
        SqliteStore::new_in_memory().unwrap()
    }

    fn make_user(store: &SqliteStore, username: &str) -> User {
        store
            .transaction(|tx| tx.create_user(username, None, "not-a-real-hash"))
            .unwrap()
    }

    #[test]
    fn test_create_and_fetch_user() {
        let store = make_store();
        let user = make_user(&store, "alice");
        let fetched = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
        assert!(fetched.about_me.is_none());
    }

    #[test]
    fn test_duplicate_username_rolls_back() {
        let store = make_store();
        make_user(&store, "alice");
        let result = store.transaction(|tx| tx.create_user("alice", None, "x"));
        assert!(result.is_err());
    }

    #[test]
    fn test_posts_by_ids_preserves_given_order() {
        let store = make_store();
        let user = make_user(&store, "alice");
        let ids: Vec<i64> = store
            .transaction(|tx| {
                Ok(["one", "two", "three"]
                    .iter()
                    .map(|body| tx.create_post(user.id, body).map(|p| p.id))
                    .collect::<Result<Vec<_>>>()?)
            })
            .unwrap();

        let reversed: Vec<i64> = ids.iter().rev().copied().collect();
        let posts = store.get_posts_by_ids(&reversed).unwrap();
        let fetched_ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(fetched_ids, reversed);
    }

    #[test]
    fn test_feed_contains_own_and_followed_posts_only() {
        let store = make_store();
        let alice = make_user(&store, "alice");
        let bob = make_user(&store, "bob");
        let carol = make_user(&store, "carol");
        store
            .transaction(|tx| {
                tx.create_post(alice.id, "from alice")?;
                tx.create_post(bob.id, "from bob")?;
                tx.create_post(carol.id, "from carol")?;
                tx.follow(alice.id, bob.id)?;
                Ok(())
            })
            .unwrap();

        let feed = store.get_feed(alice.id, 1, 20).unwrap();
        let authors: Vec<i64> = feed.iter().map(|p| p.user_id).collect();
        assert!(authors.contains(&alice.id));
        assert!(authors.contains(&bob.id));
        assert!(!authors.contains(&carol.id));
    }

    #[test]
    fn test_task_in_progress_lookup() {
        let store = make_store();
        let alice = make_user(&store, "alice");
        let task = TaskRecord {
            id: "job-1".to_string(),
            name: "export_posts".to_string(),
            description: "Exporting posts...".to_string(),
            complete: false,
            user_id: alice.id,
        };
        store.transaction(|tx| tx.insert_task(&task)).unwrap();

        let found = store
            .get_task_in_progress(alice.id, "export_posts")
            .unwrap();
        assert_eq!(found.map(|t| t.id), Some("job-1".to_string()));

        store
            .transaction(|tx| {
                assert!(tx.complete_task("job-1")?);
                Ok(())
            })
            .unwrap();
        assert!(store
            .get_task_in_progress(alice.id, "export_posts")
            .unwrap()
            .is_none());
        assert!(store.get_task("job-1").unwrap().unwrap().complete);
    }

    struct CountingListener {
        before: std::sync::atomic::AtomicUsize,
        after: std::sync::atomic::AtomicUsize,
    }

    impl CommitListener for CountingListener {
        fn before_commit(&self, scope: &mut CommitScope) {
            assert!(!scope.changes().is_empty());
            self.before
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn after_commit(&self, _scope: &mut CommitScope) {
            self.after.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listeners_fire_around_successful_commit_only() {
        let store = make_store();
        let listener = Arc::new(CountingListener {
            before: Default::default(),
            after: Default::default(),
        });
        store.register_commit_listener(listener.clone());

        make_user(&store, "alice");
        assert_eq!(listener.before.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(listener.after.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Rolled-back transaction: neither hook runs
        let result: Result<()> = store.transaction(|tx| {
            tx.create_post(1, "doomed")?;
            anyhow::bail!("abort")
        });
        assert!(result.is_err());
        assert_eq!(listener.before.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(listener.after.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
