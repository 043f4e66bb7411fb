use super::session::Session;
use super::state::ServerState;
use crate::store::TaskRecord;
use crate::tasks::EXPORT_POSTS_TASK;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
struct TaskWithProgress {
    #[serde(flatten)]
    task: TaskRecord,
    progress: u8,
}

/// One export at a time per user. The in-progress check is advisory, a
/// duplicate slipping through the race just produces a second export file.
pub async fn launch_export(session: Session, State(state): State<ServerState>) -> Response {
    match state
        .store
        .get_task_in_progress(session.user.id, EXPORT_POSTS_TASK)
    {
        Ok(Some(_)) => return StatusCode::CONFLICT.into_response(),
        Ok(None) => {}
        Err(err) => {
            error!("Error checking for running export: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let launched = state.store.transaction(|tx| {
        state
            .tracker
            .launch(tx, session.user.id, EXPORT_POSTS_TASK, "Exporting posts...")
    });
    match launched {
        Ok(task) => (StatusCode::ACCEPTED, Json(task)).into_response(),
        Err(err) => {
            error!("Error launching export task: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_tasks(session: Session, State(state): State<ServerState>) -> Response {
    match state.store.get_user_tasks(session.user.id) {
        Ok(tasks) => {
            let tasks: Vec<TaskWithProgress> = tasks
                .into_iter()
                .map(|task| TaskWithProgress {
                    progress: state.tracker.progress(&task),
                    task,
                })
                .collect();
            Json(tasks).into_response()
        }
        Err(err) => {
            error!("Error fetching tasks: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
