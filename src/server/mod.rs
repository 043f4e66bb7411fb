mod auth_routes;
mod post_routes;
mod search_routes;
mod session;
mod state;
mod task_routes;

pub use session::Session;
pub use state::ServerState;

use anyhow::Result;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use auth_routes::{login, logout, me, register, update_me};
use post_routes::{
    create_post, delete_post, follow_user, get_feed, get_post, get_posts, get_profile,
    unfollow_user,
};
use search_routes::search_posts;
use task_routes::{get_tasks, launch_export};

pub fn make_app(state: ServerState) -> Router {
    let api_routes: Router = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/me", put(update_me))
        .route("/posts", post(create_post))
        .route("/posts", get(get_posts))
        .route("/posts/{id}", get(get_post))
        .route("/posts/{id}", delete(delete_post))
        .route("/feed", get(get_feed))
        .route("/users/{username}", get(get_profile))
        .route("/users/{username}/follow", post(follow_user))
        .route("/users/{username}/follow", delete(unfollow_user))
        .route("/search", get(search_posts))
        .route("/export", post(launch_export))
        .route("/tasks", get(get_tasks))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(state: ServerState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
