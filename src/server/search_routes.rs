use super::post_routes::DEFAULT_PER_PAGE;
use super::session::Session;
use super::state::ServerState;
use crate::store::Post;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

#[derive(Deserialize, Debug)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

#[derive(Serialize)]
struct SearchResponse {
    posts: Vec<Post>,
    total: usize,
}

pub async fn search_posts(
    _session: Session,
    State(state): State<ServerState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state
        .synchronizer
        .search_posts(&state.store, &query.q, query.page, query.per_page)
    {
        Ok((posts, total)) => Json(SearchResponse { posts, total }).into_response(),
        Err(err) => {
            error!("Error searching posts: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
