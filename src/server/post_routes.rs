use super::session::Session;
use super::state::GuardedStore;
use crate::store::{Post, User};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

pub const DEFAULT_PER_PAGE: usize = 20;

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

#[derive(Deserialize, Debug)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

pub const MAX_POST_LENGTH: usize = 280;

#[derive(Deserialize, Debug)]
pub struct CreatePostBody {
    pub body: String,
}

#[derive(Serialize)]
struct UserProfile {
    #[serde(flatten)]
    user: User,
    posts: Vec<Post>,
    followers: usize,
    following: usize,
    is_followed: bool,
}

pub async fn create_post(
    session: Session,
    State(store): State<GuardedStore>,
    Json(body): Json<CreatePostBody>,
) -> Response {
    if body.body.is_empty() || body.body.chars().count() > MAX_POST_LENGTH {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match store.transaction(|tx| tx.create_post(session.user.id, &body.body)) {
        Ok(post) => (StatusCode::CREATED, Json(post)).into_response(),
        Err(err) => {
            error!("Error creating post: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_post(
    _session: Session,
    State(store): State<GuardedStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_post(id) {
        Ok(Some(post)) => Json(post).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Error fetching post {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn delete_post(
    session: Session,
    State(store): State<GuardedStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_post(id) {
        Ok(Some(post)) if post.user_id != session.user.id => {
            StatusCode::FORBIDDEN.into_response()
        }
        Ok(Some(_)) => match store.transaction(|tx| tx.delete_post(id)) {
            Ok(_) => StatusCode::OK.into_response(),
            Err(err) => {
                error!("Error deleting post {}: {}", id, err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Error fetching post {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_posts(
    _session: Session,
    State(store): State<GuardedStore>,
    Query(paging): Query<PageQuery>,
) -> Response {
    match store.get_posts(paging.page, paging.per_page) {
        Ok(posts) => Json(posts).into_response(),
        Err(err) => {
            error!("Error fetching posts: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_feed(
    session: Session,
    State(store): State<GuardedStore>,
    Query(paging): Query<PageQuery>,
) -> Response {
    match store.get_feed(session.user.id, paging.page, paging.per_page) {
        Ok(posts) => Json(posts).into_response(),
        Err(err) => {
            error!("Error fetching feed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_profile(
    session: Session,
    State(store): State<GuardedStore>,
    Path(username): Path<String>,
) -> Response {
    let user = match store.get_user_by_username(&username) {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Error fetching user '{}': {}", username, err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let profile = store.get_user_posts(user.id).and_then(|posts| {
        Ok(UserProfile {
            posts,
            followers: store.follower_count(user.id)?,
            following: store.following_count(user.id)?,
            is_followed: store.is_following(session.user.id, user.id)?,
            user,
        })
    });
    match profile {
        Ok(profile) => Json(profile).into_response(),
        Err(err) => {
            error!("Error assembling profile for '{}': {}", username, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn follow_user(
    session: Session,
    State(store): State<GuardedStore>,
    Path(username): Path<String>,
) -> Response {
    update_follow(session, store, &username, true)
}

pub async fn unfollow_user(
    session: Session,
    State(store): State<GuardedStore>,
    Path(username): Path<String>,
) -> Response {
    update_follow(session, store, &username, false)
}

fn update_follow(session: Session, store: GuardedStore, username: &str, follow: bool) -> Response {
    let target = match store.get_user_by_username(username) {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Error fetching user '{}': {}", username, err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if target.id == session.user.id {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let result = store.transaction(|tx| {
        if follow {
            tx.follow(session.user.id, target.id)
        } else {
            tx.unfollow(session.user.id, target.id)
        }
    });
    match result {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => {
            error!("Error updating follow state: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
