use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{NewTask, NewUser, Task, TaskId, TaskStatus, User, UserId};
use crate::storage::{StorageError, TaskRepository, UserRepository};

struct Inner {
    next_user_id: UserId,
    next_task_id: TaskId,
    users: HashMap<UserId, User>,
    tasks: HashMap<TaskId, Task>,
}

/// Volatile backend. One exclusive lock serializes every operation; the HTTP
/// surface and the bot loop share a single instance, and the claim in
/// `list_due_for_notify` must read and mark in the same critical section.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_user_id: 1,
                next_task_id: 1,
                users: HashMap::new(),
                tasks: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: NewTask) -> Result<Task, StorageError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&task.user_id) {
            return Err(StorageError::NotFound);
        }
        let now = Utc::now();
        let id = inner.next_task_id;
        inner.next_task_id += 1;
        let task = Task {
            id,
            user_id: task.user_id,
            text: task.text,
            status: task.status,
            due_at: task.due_at,
            remind_at: task.remind_at,
            notified_at: task.notified_at,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn list(
        &self,
        user_id: UserId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.id);
        Ok(out)
    }

    async fn get_by_id(&self, id: TaskId) -> Result<Task, StorageError> {
        let inner = self.inner.lock().await;
        inner.tasks.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn update(&self, mut task: Task) -> Result<Task, StorageError> {
        let mut inner = self.inner.lock().await;
        if !inner.tasks.contains_key(&task.id) {
            return Err(StorageError::NotFound);
        }
        task.updated_at = Utc::now();
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn mark_done(&self, id: TaskId) -> Result<Task, StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StorageError::NotFound)?;
        task.status = TaskStatus::Done;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn set_due(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Task, StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StorageError::NotFound)?;
        task.due_at = due_at;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn set_remind(
        &self,
        id: TaskId,
        remind_at: Option<DateTime<Utc>>,
    ) -> Result<Task, StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(&id).ok_or(StorageError::NotFound)?;
        task.remind_at = remind_at;
        task.notified_at = None;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn list_due_for_notify(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StorageError> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::new();
        for task in inner.tasks.values_mut() {
            if task.status != TaskStatus::Active {
                continue;
            }
            let due = match task.remind_at {
                Some(remind_at) => remind_at <= now,
                None => false,
            };
            if !due || task.notified_at.is_some() {
                continue;
            }
            task.notified_at = Some(now);
            task.updated_at = now;
            out.push(task.clone());
        }
        out.sort_by_key(|t| t.id);
        Ok(out)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_by_telegram_id(&self, telegram_user_id: i64) -> Result<User, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .users
            .values()
            .find(|u| u.telegram_user_id == telegram_user_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let timezone = if user.timezone.is_empty() {
            "UTC".to_owned()
        } else {
            user.timezone
        };
        let user = User {
            id,
            telegram_user_id: user.telegram_user_id,
            chat_id: user.chat_id,
            timezone,
            created_at: Utc::now(),
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<User> = inner.users.values().cloned().collect();
        out.sort_by_key(|u| u.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn past() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap()
    }

    async fn seed_user(store: &MemoryStore) -> User {
        store
            .create_user(NewUser {
                telegram_user_id: 10,
                chat_id: 20,
                timezone: "UTC".into(),
            })
            .await
            .unwrap()
    }

    fn new_task(user_id: UserId, remind_at: Option<DateTime<Utc>>) -> NewTask {
        NewTask {
            user_id,
            text: "water the plants".into(),
            status: TaskStatus::Active,
            due_at: None,
            remind_at,
            notified_at: None,
        }
    }

    #[tokio::test]
    async fn create_requires_existing_user() {
        let store = MemoryStore::new();
        let err = store.create(new_task(42, None)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn claim_marks_and_never_returns_twice() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let task = store
            .create(new_task(user.id, Some(past())))
            .await
            .unwrap();

        let now = past() + chrono::Duration::minutes(1);
        let claimed = store.list_due_for_notify(now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, task.id);
        assert_eq!(claimed[0].notified_at, Some(now));

        let later = now + chrono::Duration::hours(1);
        assert!(store.list_due_for_notify(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_skips_done_future_and_unarmed_tasks() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let now = past();

        let done = store.create(new_task(user.id, Some(now))).await.unwrap();
        store.mark_done(done.id).await.unwrap();
        store
            .create(new_task(user.id, Some(now + chrono::Duration::hours(1))))
            .await
            .unwrap();
        store.create(new_task(user.id, None)).await.unwrap();

        assert!(store.list_due_for_notify(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_remind_clears_notified_at() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let task = store
            .create(new_task(user.id, Some(past())))
            .await
            .unwrap();
        store.list_due_for_notify(past()).await.unwrap();

        let rearmed = store
            .set_remind(task.id, Some(past() + chrono::Duration::hours(2)))
            .await
            .unwrap();
        assert!(rearmed.notified_at.is_none());
    }

    #[tokio::test]
    async fn listings_are_ordered_and_filtered() {
        let store = MemoryStore::new();
        let user = seed_user(&store).await;
        let first = store.create(new_task(user.id, None)).await.unwrap();
        let second = store.create(new_task(user.id, None)).await.unwrap();
        store.mark_done(second.id).await.unwrap();

        let active = store.list_active(user.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);

        let all = store.list(user.id, None).await.unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }
}
