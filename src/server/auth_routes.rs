use super::session::Session;
use super::state::GuardedStore;
use crate::user::{hash_password, verify_password, AuthTokenValue};

use axum::{
    body::Body,
    extract::State,
    http::{response, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Deserialize, Debug)]
pub struct RegisterBody {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginSuccessResponse {
    token: String,
}

pub async fn register(
    State(store): State<GuardedStore>,
    Json(body): Json<RegisterBody>,
) -> Response {
    if body.username.is_empty() || body.password.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Error hashing password: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match store.transaction(|tx| tx.create_user(&body.username, body.email.as_deref(), &password_hash))
    {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(err) => {
            debug!("Error creating user '{}': {}", body.username, err);
            StatusCode::CONFLICT.into_response()
        }
    }
}

pub async fn login(State(store): State<GuardedStore>, Json(body): Json<LoginBody>) -> Response {
    let user = match store.get_user_by_username(&body.username) {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::FORBIDDEN.into_response(),
        Err(err) => {
            error!("Error fetching user for login: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !matches!(verify_password(&body.password, &user.password_hash), Ok(true)) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let token = AuthTokenValue::generate();
    if let Err(err) = store.transaction(|tx| tx.insert_auth_token(user.id, &token.0)) {
        error!("Error with auth token generation: {}", err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let response_body = LoginSuccessResponse {
        token: token.0.clone(),
    };
    let response_body = serde_json::to_string(&response_body).unwrap();
    let cookie_value =
        HeaderValue::from_str(&format!("session_token={}; Path=/; HttpOnly", token.0)).unwrap();
    response::Builder::new()
        .status(StatusCode::CREATED)
        .header(axum::http::header::SET_COOKIE, cookie_value)
        .body(Body::from(response_body))
        .unwrap()
}

pub async fn logout(State(store): State<GuardedStore>, session: Session) -> Response {
    match store.transaction(|tx| tx.delete_auth_token(&session.token)) {
        Ok(_) => {
            let cookie_value = "session_token=; Path=/; HttpOnly; Max-Age=0";
            response::Builder::new()
                .status(StatusCode::OK)
                .header(axum::http::header::SET_COOKIE, cookie_value)
                .body(Body::empty())
                .unwrap()
        }
        Err(err) => {
            error!("Error deleting auth token: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn me(session: Session) -> Response {
    Json(session.user).into_response()
}

#[derive(Deserialize, Debug)]
pub struct UpdateMeBody {
    pub about_me: String,
}

pub async fn update_me(
    State(store): State<GuardedStore>,
    session: Session,
    Json(body): Json<UpdateMeBody>,
) -> Response {
    match store.transaction(|tx| tx.update_about_me(session.user.id, &body.about_me)) {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Error updating profile: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
