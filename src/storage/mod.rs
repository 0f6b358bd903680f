pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{NewTask, NewUser, Task, TaskId, TaskStatus, User, UserId};

#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested task or user does not exist.
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Task persistence. Implementations store and return instants in UTC;
/// timezone projection belongs to the lifecycle service.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<Task, StorageError>;

    async fn list(
        &self,
        user_id: UserId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StorageError>;

    async fn list_active(&self, user_id: UserId) -> Result<Vec<Task>, StorageError> {
        self.list(user_id, Some(TaskStatus::Active)).await
    }

    async fn get_by_id(&self, id: TaskId) -> Result<Task, StorageError>;

    /// Full-record update, used by the HTTP PATCH handler.
    async fn update(&self, task: Task) -> Result<Task, StorageError>;

    async fn mark_done(&self, id: TaskId) -> Result<Task, StorageError>;

    async fn delete(&self, id: TaskId) -> Result<(), StorageError>;

    async fn set_due(&self, id: TaskId, due_at: Option<DateTime<Utc>>)
    -> Result<Task, StorageError>;

    /// Also clears `notified_at`, so a changed reminder is always re-armable.
    async fn set_remind(
        &self,
        id: TaskId,
        remind_at: Option<DateTime<Utc>>,
    ) -> Result<Task, StorageError>;

    /// Atomically claims every active task whose `remind_at` is non-null,
    /// `remind_at <= now` and `notified_at` is null, stamping
    /// `notified_at = now` in the same step. A task returned once is never
    /// returned again, however `now` advances and however many callers race.
    async fn list_due_for_notify(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StorageError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_telegram_id(&self, telegram_user_id: i64) -> Result<User, StorageError>;

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;

    async fn list_users(&self) -> Result<Vec<User>, StorageError>;
}

pub trait Storage: TaskRepository + UserRepository {}

impl<T: TaskRepository + UserRepository> Storage for T {}
