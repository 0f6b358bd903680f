//! Plain CRUD over the store for scripting and debugging. Instants go over
//! the wire in UTC; only the chat surface projects into user timezones.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{NewTask, NewUser, Task, TaskId, TaskStatus, UserId};
use crate::storage::{Storage, StorageError, TaskRepository, UserRepository};

type ApiError = (StatusCode, Json<Value>);

pub fn router(store: Arc<dyn Storage>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/users", get(list_users).post(create_user))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .with_state(store)
}

fn bad_request(field: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": field })))
}

fn storage_error(err: StorageError) -> ApiError {
    match err {
        StorageError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not_found" })),
        ),
        other => {
            log::error!("storage error: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store" })),
            )
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": "true" }))
}

async fn list_users(State(store): State<Arc<dyn Storage>>) -> Result<Json<Value>, ApiError> {
    let items = store.list_users().await.map_err(storage_error)?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateUserRequest {
    #[serde(default)]
    telegram_user_id: i64,
    #[serde(default)]
    chat_id: i64,
    #[serde(default)]
    timezone: String,
}

async fn create_user(
    State(store): State<Arc<dyn Storage>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.telegram_user_id == 0 || req.chat_id == 0 {
        return Err(bad_request("telegram_user_id/chat_id"));
    }
    let timezone = if req.timezone.is_empty() {
        "UTC".to_owned()
    } else {
        req.timezone
    };
    let user = store
        .create_user(NewUser {
            telegram_user_id: req.telegram_user_id,
            chat_id: req.chat_id,
            timezone,
        })
        .await
        .map_err(storage_error)?;
    Ok((StatusCode::CREATED, Json(json!(user))))
}

#[derive(Deserialize)]
struct ListTasksQuery {
    user_id: Option<UserId>,
    status: Option<String>,
}

async fn list_tasks(
    State(store): State<Arc<dyn Storage>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = match query.user_id {
        Some(id) if id > 0 => id,
        _ => return Err(bad_request("user_id")),
    };
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(TaskStatus::parse(raw).ok_or_else(|| bad_request("status"))?),
    };
    let items = store.list(user_id, status).await.map_err(storage_error)?;
    Ok(Json(json!({ "items": items })))
}

async fn get_task(
    State(store): State<Arc<dyn Storage>>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    if id <= 0 {
        return Err(bad_request("id"));
    }
    let task = store.get_by_id(id).await.map_err(storage_error)?;
    Ok(Json(task))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTaskRequest {
    user_id: UserId,
    text: String,
    status: Option<String>,
    due_at: Option<DateTime<Utc>>,
    remind_at: Option<DateTime<Utc>>,
    notified_at: Option<DateTime<Utc>>,
}

async fn create_task(
    State(store): State<Arc<dyn Storage>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if req.user_id <= 0 {
        return Err(bad_request("user_id"));
    }
    let text = req.text.trim().to_owned();
    if text.is_empty() {
        return Err(bad_request("text"));
    }
    let status = match req.status.as_deref() {
        None | Some("") => TaskStatus::Active,
        Some(raw) => TaskStatus::parse(raw).ok_or_else(|| bad_request("status"))?,
    };
    let task = store
        .create(NewTask {
            user_id: req.user_id,
            text,
            status,
            due_at: req.due_at,
            remind_at: req.remind_at,
            notified_at: req.notified_at,
        })
        .await
        .map_err(storage_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Partial update: absent fields keep their stored values. There is no way
/// to null out an instant through this endpoint; that matches the bot,
/// which only ever moves dates forward to new values.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateTaskRequest {
    text: Option<String>,
    status: Option<String>,
    due_at: Option<DateTime<Utc>>,
    remind_at: Option<DateTime<Utc>>,
    notified_at: Option<DateTime<Utc>>,
}

async fn update_task(
    State(store): State<Arc<dyn Storage>>,
    Path(id): Path<TaskId>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    if id <= 0 {
        return Err(bad_request("id"));
    }
    let mut task = store.get_by_id(id).await.map_err(storage_error)?;
    if let Some(text) = req.text {
        let trimmed = text.trim().to_owned();
        if trimmed.is_empty() {
            return Err(bad_request("text"));
        }
        task.text = trimmed;
    }
    if let Some(raw) = req.status {
        task.status = TaskStatus::parse(&raw).ok_or_else(|| bad_request("status"))?;
    }
    if req.due_at.is_some() {
        task.due_at = req.due_at;
    }
    if req.remind_at.is_some() {
        task.remind_at = req.remind_at;
    }
    if req.notified_at.is_some() {
        task.notified_at = req.notified_at;
    }
    let task = store.update(task).await.map_err(storage_error)?;
    Ok(Json(task))
}

async fn delete_task(
    State(store): State<Arc<dyn Storage>>,
    Path(id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    if id <= 0 {
        return Err(bad_request("id"));
    }
    store.delete(id).await.map_err(storage_error)?;
    Ok(StatusCode::NO_CONTENT)
}
