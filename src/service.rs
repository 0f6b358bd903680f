use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;

use crate::domain::{NewTask, Task, TaskId, TaskStatus, UserId};
use crate::storage::{Storage, StorageError, TaskRepository};
use crate::timezone::{self, InvalidTimezone, Location};

pub type Clock = fn() -> DateTime<Utc>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The task body is empty after trimming.
    #[error("task text is empty")]
    InvalidText,
    #[error(transparent)]
    InvalidTimezone(#[from] InvalidTimezone),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A task projected into a caller's timezone for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub id: TaskId,
    pub user_id: UserId,
    pub text: String,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<FixedOffset>>,
    pub remind_at: Option<DateTime<FixedOffset>>,
    pub notified_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// Task lifecycle: validation, UTC normalization on the way in, timezone
/// projection on the way out. Holds no state besides the repository handle
/// and a clock that tests can stub.
pub struct TaskService {
    repo: Arc<dyn Storage>,
    clock: Clock,
}

impl TaskService {
    pub fn new(repo: Arc<dyn Storage>) -> Self {
        Self::with_clock(repo, Utc::now)
    }

    pub fn with_clock(repo: Arc<dyn Storage>, clock: Clock) -> Self {
        Self { repo, clock }
    }

    pub async fn create(
        &self,
        user_id: UserId,
        text: &str,
        due_at: Option<DateTime<FixedOffset>>,
        remind_at: Option<DateTime<FixedOffset>>,
        tz: &str,
    ) -> Result<TaskView, ServiceError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidText);
        }
        let location = timezone::resolve(tz)?;
        let task = self
            .repo
            .create(NewTask {
                user_id,
                text: trimmed.to_owned(),
                status: TaskStatus::Active,
                due_at: due_at.map(to_utc),
                remind_at: remind_at.map(to_utc),
                notified_at: None,
            })
            .await?;
        Ok(project(task, location))
    }

    pub async fn list_active(&self, user_id: UserId, tz: &str) -> Result<Vec<TaskView>, ServiceError> {
        let location = timezone::resolve(tz)?;
        let tasks = self.repo.list_active(user_id).await?;
        Ok(tasks.into_iter().map(|t| project(t, location)).collect())
    }

    pub async fn get_by_id(&self, id: TaskId, tz: &str) -> Result<TaskView, ServiceError> {
        let location = timezone::resolve(tz)?;
        let task = self.repo.get_by_id(id).await?;
        Ok(project(task, location))
    }

    pub async fn mark_done(&self, id: TaskId, tz: &str) -> Result<TaskView, ServiceError> {
        let location = timezone::resolve(tz)?;
        let task = self.repo.mark_done(id).await?;
        Ok(project(task, location))
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), ServiceError> {
        Ok(self.repo.delete(id).await?)
    }

    pub async fn set_due(
        &self,
        id: TaskId,
        due_at: Option<DateTime<FixedOffset>>,
        tz: &str,
    ) -> Result<TaskView, ServiceError> {
        let location = timezone::resolve(tz)?;
        let task = self.repo.set_due(id, due_at.map(to_utc)).await?;
        Ok(project(task, location))
    }

    pub async fn set_remind(
        &self,
        id: TaskId,
        remind_at: Option<DateTime<FixedOffset>>,
        tz: &str,
    ) -> Result<TaskView, ServiceError> {
        let location = timezone::resolve(tz)?;
        let task = self.repo.set_remind(id, remind_at.map(to_utc)).await?;
        Ok(project(task, location))
    }

    /// Claims every reminder due as of the service clock. Results stay in
    /// UTC; callers wanting per-user display resolve timezones themselves.
    /// No component in this binary calls it yet; the contract is kept for a
    /// background notifier.
    pub async fn list_due_for_notify(&self) -> Result<Vec<Task>, ServiceError> {
        let now = (self.clock)();
        Ok(self.repo.list_due_for_notify(now).await?)
    }
}

fn to_utc(instant: DateTime<FixedOffset>) -> DateTime<Utc> {
    instant.with_timezone(&Utc)
}

fn project(task: Task, location: Location) -> TaskView {
    TaskView {
        id: task.id,
        user_id: task.user_id,
        text: task.text,
        status: task.status,
        due_at: task.due_at.map(|t| location.project(t)),
        remind_at: task.remind_at.map(|t| location.project(t)),
        notified_at: task.notified_at.map(|t| location.project(t)),
        created_at: location.project(task.created_at),
        updated_at: location.project(task.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewUser;
    use crate::storage::UserRepository;
    use crate::storage::memory::MemoryStore;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 12, 0, 0).unwrap()
    }

    fn later_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 13, 0, 0).unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, TaskService, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                telegram_user_id: 1,
                chat_id: 1,
                timezone: "UTC".into(),
            })
            .await
            .unwrap();
        let service = TaskService::with_clock(store.clone(), fixed_now);
        (store, service, user.id)
    }

    fn local(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 2, h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_blank_text_before_storage() {
        let (store, service, user_id) = setup().await;
        let err = service
            .create(user_id, "   ", None, None, "+03:00")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidText));
        assert!(store.list(user_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_unknown_timezone() {
        let (_, service, user_id) = setup().await;
        let err = service
            .create(user_id, "task", None, None, "Atlantis/Lost")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTimezone(_)));
    }

    #[tokio::test]
    async fn create_stores_utc_and_projects_back() {
        let (store, service, user_id) = setup().await;
        let due = local(10, 0);

        let view = service
            .create(user_id, "  buy milk  ", Some(due), Some(due), "+03:00")
            .await
            .unwrap();
        assert_eq!(view.text, "buy milk");
        assert_eq!(view.due_at, Some(due));
        assert_eq!(view.due_at.unwrap().offset().local_minus_utc(), 3 * 3600);

        let stored = store.get_by_id(view.id).await.unwrap();
        assert_eq!(
            stored.due_at,
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 7, 0, 0).unwrap())
        );
        assert_eq!(stored.remind_at, stored.due_at);
    }

    #[tokio::test]
    async fn list_active_projects_into_requested_zone() {
        let (store, service, user_id) = setup().await;
        service
            .create(user_id, "task", Some(local(10, 0)), None, "UTC")
            .await
            .unwrap();
        let _ = store;

        let items = service.list_active(user_id, "+03:00").await.unwrap();
        assert_eq!(items.len(), 1);
        let due = items[0].due_at.unwrap();
        assert_eq!(due.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(due.to_rfc3339(), "2026-01-02T10:00:00+03:00");
    }

    #[tokio::test]
    async fn claim_is_idempotent_across_advancing_clocks() {
        let (store, service, user_id) = setup().await;
        let remind = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 2, 11, 0, 0)
            .unwrap();
        service
            .create(user_id, "notify me", None, Some(remind), "UTC")
            .await
            .unwrap();

        let first = service.list_due_for_notify().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].notified_at, Some(fixed_now()));

        let later_service = TaskService::with_clock(store, later_now);
        assert!(later_service.list_due_for_notify().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_remind_always_resets_notified_at() {
        let (store, service, user_id) = setup().await;
        let remind = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 2, 11, 0, 0)
            .unwrap();
        let view = service
            .create(user_id, "notify me", None, Some(remind), "UTC")
            .await
            .unwrap();
        service.list_due_for_notify().await.unwrap();
        assert!(store.get_by_id(view.id).await.unwrap().notified_at.is_some());

        let updated = service
            .set_remind(view.id, Some(remind), "UTC")
            .await
            .unwrap();
        assert!(updated.notified_at.is_none());
        assert!(store.get_by_id(view.id).await.unwrap().notified_at.is_none());
    }

    #[tokio::test]
    async fn not_found_propagates_unchanged() {
        let (_, service, _) = setup().await;
        let err = service.mark_done(404, "UTC").await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::NotFound)));
        let err = service.delete(404).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::NotFound)));
    }
}
