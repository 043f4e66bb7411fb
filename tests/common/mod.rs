//! Common test infrastructure
//!
//! Spawns an isolated server per test: its own temp databases, search index,
//! and background worker. Tests drive it over HTTP with [`TestClient`].

use quill_server::search::{Fts5SearchIndex, IndexSynchronizer, SearchIndex};
use quill_server::server::{make_app, ServerState};
use quill_server::store::SqliteStore;
use quill_server::tasks::{
    ExportPostsJob, InProcessJobQueue, TaskContext, TaskTracker, TaskWorker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const TEST_PASS: &str = "test-password-123";

pub struct TestServer {
    pub base_url: String,
    pub store: Arc<SqliteStore>,
    pub export_dir: PathBuf,
    _temp_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_inner(true).await
    }

    pub async fn spawn_without_search() -> Self {
        Self::spawn_inner(false).await
    }

    async fn spawn_inner(with_search: bool) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteStore::new(temp_dir.path().join("quill.db")).expect("Failed to open store"),
        );

        let index: Option<Arc<dyn SearchIndex>> = if with_search {
            Some(Arc::new(
                Fts5SearchIndex::new(&temp_dir.path().join("search.db"))
                    .expect("Failed to open search index"),
            ) as Arc<dyn SearchIndex>)
        } else {
            None
        };
        let synchronizer =
            Arc::new(IndexSynchronizer::new(index).expect("Failed to build synchronizer"));
        store.register_commit_listener(synchronizer.clone());

        let (queue, receiver) = InProcessJobQueue::new();
        let tracker = Arc::new(TaskTracker::new(store.clone(), queue.clone()));
        let shutdown = CancellationToken::new();
        let export_dir = temp_dir.path().to_path_buf();
        let worker = TaskWorker::new(
            receiver,
            queue,
            vec![Arc::new(ExportPostsJob)],
            TaskContext {
                store: store.clone(),
                tracker: tracker.clone(),
                export_dir: export_dir.clone(),
            },
            shutdown.clone(),
        );
        tokio::spawn(worker.run());

        let state = ServerState {
            store: store.clone(),
            synchronizer,
            tracker: tracker.clone(),
        };
        let app = make_app(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener.local_addr().expect("Failed to get address").port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let serve_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        TestServer {
            base_url,
            store,
            export_dir,
            _temp_dir: temp_dir,
            shutdown,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct TestClient {
    client: reqwest::Client,
    base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .expect("Failed to build reqwest client");
        TestClient { client, base_url }
    }

    /// A client already registered and logged in as `username`.
    pub async fn signed_up(base_url: String, username: &str) -> Self {
        let client = TestClient::new(base_url);
        let response = client.register(username, TEST_PASS).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let response = client.login(username, TEST_PASS).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/register"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap()
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap()
    }

    pub async fn logout(&self) -> reqwest::Response {
        self.client
            .post(self.url("/api/logout"))
            .send()
            .await
            .unwrap()
    }

    pub async fn me(&self) -> reqwest::Response {
        self.client.get(self.url("/api/me")).send().await.unwrap()
    }

    pub async fn update_me(&self, about_me: &str) -> reqwest::Response {
        self.client
            .put(self.url("/api/me"))
            .json(&serde_json::json!({ "about_me": about_me }))
            .send()
            .await
            .unwrap()
    }

    pub async fn create_post(&self, body: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/posts"))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .unwrap()
    }

    pub async fn delete_post(&self, id: i64) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/api/posts/{}", id)))
            .send()
            .await
            .unwrap()
    }

    pub async fn posts(&self) -> reqwest::Response {
        self.client
            .get(self.url("/api/posts"))
            .send()
            .await
            .unwrap()
    }

    pub async fn feed(&self) -> reqwest::Response {
        self.client.get(self.url("/api/feed")).send().await.unwrap()
    }

    pub async fn feed_page(&self, page: usize, per_page: usize) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/feed?page={}&per_page={}", page, per_page)))
            .send()
            .await
            .unwrap()
    }

    pub async fn profile(&self, username: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/api/users/{}", username)))
            .send()
            .await
            .unwrap()
    }

    pub async fn follow(&self, username: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/users/{}/follow", username)))
            .send()
            .await
            .unwrap()
    }

    pub async fn unfollow(&self, username: &str) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/api/users/{}/follow", username)))
            .send()
            .await
            .unwrap()
    }

    pub async fn search(&self, query: &str) -> reqwest::Response {
        self.client
            .get(self.url("/api/search"))
            .query(&[("q", query)])
            .send()
            .await
            .unwrap()
    }

    pub async fn launch_export(&self) -> reqwest::Response {
        self.client
            .post(self.url("/api/export"))
            .send()
            .await
            .unwrap()
    }

    pub async fn tasks(&self) -> reqwest::Response {
        self.client.get(self.url("/api/tasks")).send().await.unwrap()
    }
}
