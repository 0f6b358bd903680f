use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::domain::{NewTask, NewUser, Task, TaskId, TaskStatus, User, UserId};
use crate::storage::{StorageError, TaskRepository, UserRepository};

/// Relational backend over SQLite. Atomicity comes from the engine's
/// per-statement guarantees; the claim in `list_due_for_notify` is a single
/// `UPDATE ... RETURNING` statement.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database at `url` and applies
    /// pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    user_id: i64,
    text: String,
    status: String,
    due_at: Option<DateTime<Utc>>,
    remind_at: Option<DateTime<Utc>>,
    notified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        let status = TaskStatus::parse(&row.status).unwrap_or_else(|| {
            log::warn!("unknown task status {:?}, defaulting to active", row.status);
            TaskStatus::Active
        });
        Self {
            id: row.id,
            user_id: row.user_id,
            text: row.text,
            status,
            due_at: row.due_at,
            remind_at: row.remind_at,
            notified_at: row.notified_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    telegram_user_id: i64,
    chat_id: i64,
    timezone: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            telegram_user_id: row.telegram_user_id,
            chat_id: row.chat_id,
            timezone: row.timezone,
            created_at: row.created_at,
        }
    }
}

const TASK_COLUMNS: &str =
    "id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at";

fn map_constraint(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.message().contains("FOREIGN KEY") {
            return StorageError::NotFound;
        }
    }
    StorageError::Database(err)
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn create(&self, task: NewTask) -> Result<Task, StorageError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, TaskRow>(
            "INSERT INTO tasks (user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(task.user_id)
        .bind(&task.text)
        .bind(task.status.as_str())
        .bind(task.due_at)
        .bind(task.remind_at)
        .bind(task.notified_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint)?;
        Ok(row.into())
    }

    async fn list(
        &self,
        user_id: UserId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StorageError> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1");
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRow>(&format!("{query} AND status = ?2 ORDER BY id"))
                    .bind(user_id)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, TaskRow>(&format!("{query} ORDER BY id"))
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_by_id(&self, id: TaskId) -> Result<Task, StorageError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn update(&self, task: Task) -> Result<Task, StorageError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "UPDATE tasks
             SET text = ?1, status = ?2, due_at = ?3, remind_at = ?4, notified_at = ?5, updated_at = ?6
             WHERE id = ?7
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(&task.text)
        .bind(task.status.as_str())
        .bind(task.due_at)
        .bind(task.remind_at)
        .bind(task.notified_at)
        .bind(Utc::now())
        .bind(task.id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn mark_done(&self, id: TaskId) -> Result<Task, StorageError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(TaskStatus::Done.as_str())
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn set_due(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Task, StorageError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "UPDATE tasks SET due_at = ?1, updated_at = ?2 WHERE id = ?3
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(due_at)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn set_remind(
        &self,
        id: TaskId,
        remind_at: Option<DateTime<Utc>>,
    ) -> Result<Task, StorageError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "UPDATE tasks SET remind_at = ?1, notified_at = NULL, updated_at = ?2 WHERE id = ?3
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(remind_at)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn list_due_for_notify(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StorageError> {
        // Claim-and-mark in one statement; splitting the read from the write
        // would let two pollers deliver the same reminder.
        let rows = sqlx::query_as::<_, TaskRow>(
            "UPDATE tasks SET notified_at = ?1, updated_at = ?1
             WHERE status = ?2 AND remind_at IS NOT NULL AND remind_at <= ?1 AND notified_at IS NULL
             RETURNING id, user_id, text, status, due_at, remind_at, notified_at, created_at, updated_at",
        )
        .bind(now)
        .bind(TaskStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut tasks: Vec<Task> = rows.into_iter().map(Into::into).collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn get_by_telegram_id(&self, telegram_user_id: i64) -> Result<User, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, telegram_user_id, chat_id, timezone, created_at
             FROM users WHERE telegram_user_id = ?1",
        )
        .bind(telegram_user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into).ok_or(StorageError::NotFound)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let timezone = if user.timezone.is_empty() {
            "UTC"
        } else {
            &user.timezone
        };
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (telegram_user_id, chat_id, timezone, created_at)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id, telegram_user_id, chat_id, timezone, created_at",
        )
        .bind(user.telegram_user_id)
        .bind(user.chat_id)
        .bind(timezone)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, telegram_user_id, chat_id, timezone, created_at FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seed_user(store: &SqliteStore) -> User {
        store
            .create_user(NewUser {
                telegram_user_id: 7,
                chat_id: 7,
                timezone: "UTC".into(),
            })
            .await
            .unwrap()
    }

    fn new_task(user_id: UserId, remind_at: Option<DateTime<Utc>>) -> NewTask {
        NewTask {
            user_id,
            text: "pay rent".into(),
            status: TaskStatus::Active,
            due_at: None,
            remind_at,
            notified_at: None,
        }
    }

    #[sqlx::test]
    async fn create_without_user_maps_fk_to_not_found(pool: SqlitePool) {
        let store = SqliteStore::new(pool);
        let err = store.create(new_task(99, None)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[sqlx::test]
    async fn claim_is_idempotent(pool: SqlitePool) {
        let store = SqliteStore::new(pool);
        let user = seed_user(&store).await;
        let now = Utc::now();
        store
            .create(new_task(user.id, Some(now - Duration::minutes(5))))
            .await
            .unwrap();

        let first = store.list_due_for_notify(now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].notified_at.is_some());

        let second = store
            .list_due_for_notify(now + Duration::hours(1))
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[sqlx::test]
    async fn set_remind_rearms(pool: SqlitePool) {
        let store = SqliteStore::new(pool);
        let user = seed_user(&store).await;
        let now = Utc::now();
        let task = store
            .create(new_task(user.id, Some(now - Duration::minutes(5))))
            .await
            .unwrap();
        store.list_due_for_notify(now).await.unwrap();

        let rearmed = store
            .set_remind(task.id, Some(now + Duration::minutes(30)))
            .await
            .unwrap();
        assert!(rearmed.notified_at.is_none());

        let claimed = store
            .list_due_for_notify(now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[sqlx::test]
    async fn missing_rows_are_not_found(pool: SqlitePool) {
        let store = SqliteStore::new(pool);
        assert!(matches!(
            store.get_by_id(1).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(matches!(
            store.mark_done(1).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(matches!(
            store.delete(1).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(matches!(
            store.get_by_telegram_id(1).await.unwrap_err(),
            StorageError::NotFound
        ));
    }
}
