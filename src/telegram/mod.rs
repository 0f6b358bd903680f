pub mod client;
pub mod command;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tokio_util::sync::CancellationToken;

use crate::domain::{NewUser, TaskId, User, UserId};
use crate::service::{ServiceError, TaskService, TaskView};
use crate::storage::{Storage, StorageError, UserRepository};
use crate::timezone;
use client::{Message, TelegramApi, Update};

/// Fixed pause between failed polls. Deliberately no backoff growth; the
/// loop retries at this interval for as long as the transport is down.
const POLL_RETRY_INTERVAL: Duration = Duration::from_secs(2);

const HELP_TEXT: &str = "Commands:\n\
    /start - this help\n\
    /add <text> [YYYY-MM-DD HH:MM] - add a task\n\
    /list - active tasks\n\
    /done <id> - complete a task\n\
    /del <id> - delete a task\n\
    /due <id> <YYYY-MM-DD HH:MM> - set due date and reminder";

pub struct Bot<A: TelegramApi> {
    api: A,
    tasks: TaskService,
    users: Arc<dyn Storage>,
    poll_timeout: Duration,
}

impl<A: TelegramApi> Bot<A> {
    pub fn new(
        api: A,
        tasks: TaskService,
        users: Arc<dyn Storage>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            api,
            tasks,
            users,
            poll_timeout,
        }
    }

    /// Long-poll loop. Runs until `cancel` fires; transport errors are
    /// logged and retried, never fatal. Updates are handled strictly in
    /// arrival order by this single task.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut offset: i64 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.api.get_updates(offset, self.poll_timeout) => result,
            };
            let updates = match fetched {
                Ok(updates) => updates,
                Err(err) => {
                    log::warn!("telegram getUpdates error: {err}");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(POLL_RETRY_INTERVAL) => {}
                    }
                    continue;
                }
            };
            self.handle_batch(&mut offset, updates).await;
        }
    }

    /// Acknowledges every update by advancing the offset past it, then
    /// handles the ones that carry message text. Advancing first means a
    /// handling failure is logged, not redelivered.
    async fn handle_batch(&self, offset: &mut i64, updates: Vec<Update>) {
        for update in updates {
            *offset = update.update_id + 1;
            let Some(message) = update.message else {
                continue;
            };
            if message.text.as_deref().unwrap_or("").is_empty() {
                continue;
            }
            if let Err(err) = self.handle_message(&message).await {
                log::error!("telegram handle message error: {err:#}");
            }
        }
    }

    async fn handle_message(&self, msg: &Message) -> anyhow::Result<()> {
        let Some(from) = &msg.from else {
            return Ok(());
        };
        let Some(text) = msg.text.as_deref() else {
            return Ok(());
        };
        let Some((cmd, args)) = command::parse_command(text) else {
            return Ok(());
        };
        let chat_id = msg.chat.id;

        let user = match self.ensure_user(from.id, chat_id).await {
            Ok(user) => user,
            Err(err) => {
                // The lookup failure is the error worth surfacing; a failed
                // reply on top of it is only logged.
                if let Err(send_err) = self
                    .api
                    .send_message(chat_id, "Something went wrong, please try again.")
                    .await
                {
                    log::warn!("telegram send error: {send_err}");
                }
                return Err(err.into());
            }
        };
        let tz = if user.timezone.is_empty() {
            "UTC"
        } else {
            user.timezone.as_str()
        };

        match cmd.as_str() {
            "start" => self.api.send_message(chat_id, HELP_TEXT).await?,
            "add" => self.handle_add(chat_id, &user, tz, &args).await?,
            "list" => self.handle_list(chat_id, &user, tz).await?,
            "done" => self.handle_done(chat_id, &user, tz, &args).await?,
            "del" => self.handle_del(chat_id, &user, tz, &args).await?,
            "due" => self.handle_due(chat_id, &user, tz, &args).await?,
            _ => {
                self.api
                    .send_message(chat_id, "Unknown command. /start shows the help.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_add(
        &self,
        chat_id: i64,
        user: &User,
        tz: &str,
        args: &str,
    ) -> anyhow::Result<()> {
        let usage = "Usage: /add <text> [YYYY-MM-DD HH:MM]";
        let Some((text, naive_at)) = command::parse_add_args(args) else {
            self.api.send_message(chat_id, usage).await?;
            return Ok(());
        };
        let at = match naive_at {
            Some(naive) => match localize(naive, tz) {
                Some(at) => Some(at),
                None => {
                    self.api.send_message(chat_id, usage).await?;
                    return Ok(());
                }
            },
            None => None,
        };
        // A dated task gets the same instant as both due time and reminder.
        match self.tasks.create(user.id, &text, at, at, tz).await {
            Ok(task) => {
                self.api
                    .send_message(chat_id, &format!("Added task #{}.", task.id))
                    .await?;
            }
            Err(ServiceError::InvalidText) => {
                self.api
                    .send_message(chat_id, "The task text is empty, try again.")
                    .await?;
            }
            Err(err) => {
                log::error!("add task failed: {err}");
                self.api
                    .send_message(chat_id, "Could not add the task.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_list(&self, chat_id: i64, user: &User, tz: &str) -> anyhow::Result<()> {
        match self.tasks.list_active(user.id, tz).await {
            Ok(items) => {
                self.api
                    .send_message(chat_id, &format_task_list(&items))
                    .await?;
            }
            Err(err) => {
                log::error!("list tasks failed: {err}");
                self.api
                    .send_message(chat_id, "Could not fetch the task list.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_done(
        &self,
        chat_id: i64,
        user: &User,
        tz: &str,
        args: &str,
    ) -> anyhow::Result<()> {
        let Some(id) = command::parse_id_arg(args) else {
            self.api.send_message(chat_id, "Usage: /done <id>").await?;
            return Ok(());
        };
        if self.ensure_task_owner(id, user.id, tz).await.is_err() {
            self.api.send_message(chat_id, "Task not found.").await?;
            return Ok(());
        }
        match self.tasks.mark_done(id, tz).await {
            Ok(task) => {
                self.api
                    .send_message(chat_id, &format!("Done, task #{} closed.", task.id))
                    .await?;
            }
            Err(err) => {
                log::error!("mark done failed: {err}");
                self.api
                    .send_message(chat_id, "Could not complete the task.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_del(
        &self,
        chat_id: i64,
        user: &User,
        tz: &str,
        args: &str,
    ) -> anyhow::Result<()> {
        let Some(id) = command::parse_id_arg(args) else {
            self.api.send_message(chat_id, "Usage: /del <id>").await?;
            return Ok(());
        };
        if self.ensure_task_owner(id, user.id, tz).await.is_err() {
            self.api.send_message(chat_id, "Task not found.").await?;
            return Ok(());
        }
        match self.tasks.delete(id).await {
            Ok(()) => {
                self.api
                    .send_message(chat_id, &format!("Deleted task #{id}."))
                    .await?;
            }
            Err(err) => {
                log::error!("delete task failed: {err}");
                self.api
                    .send_message(chat_id, "Could not delete the task.")
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_due(
        &self,
        chat_id: i64,
        user: &User,
        tz: &str,
        args: &str,
    ) -> anyhow::Result<()> {
        let usage = "Usage: /due <id> <YYYY-MM-DD HH:MM>";
        let Some((id, naive)) = command::parse_due_args(args) else {
            self.api.send_message(chat_id, usage).await?;
            return Ok(());
        };
        let Some(at) = localize(naive, tz) else {
            self.api.send_message(chat_id, usage).await?;
            return Ok(());
        };
        if self.ensure_task_owner(id, user.id, tz).await.is_err() {
            self.api.send_message(chat_id, "Task not found.").await?;
            return Ok(());
        }
        let task = match self.tasks.set_due(id, Some(at), tz).await {
            Ok(task) => task,
            Err(err) => {
                log::error!("set due failed: {err}");
                self.api
                    .send_message(chat_id, "Could not set the due date.")
                    .await?;
                return Ok(());
            }
        };
        // Second, separate step: re-arm the reminder to the same instant.
        // Not atomic with the first; when it fails the task keeps the new
        // due time and its old reminder state, and the reply says so.
        if let Err(err) = self.tasks.set_remind(id, Some(at), tz).await {
            log::error!("set remind failed: {err}");
            self.api
                .send_message(chat_id, "Due date set, but the reminder was not.")
                .await?;
            return Ok(());
        }
        self.api
            .send_message(
                chat_id,
                &format!("Due date for #{}: {}.", task.id, format_time(at)),
            )
            .await?;
        Ok(())
    }

    /// Looks up the sender, creating them on first contact with the
    /// message's chat id and the default timezone.
    async fn ensure_user(&self, telegram_user_id: i64, chat_id: i64) -> Result<User, StorageError> {
        match self.users.get_by_telegram_id(telegram_user_id).await {
            Ok(user) => Ok(user),
            Err(StorageError::NotFound) => {
                self.users
                    .create_user(NewUser {
                        telegram_user_id,
                        chat_id,
                        timezone: "UTC".to_owned(),
                    })
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// A task owned by someone else is indistinguishable from a missing one.
    async fn ensure_task_owner(
        &self,
        id: TaskId,
        user_id: UserId,
        tz: &str,
    ) -> Result<(), ServiceError> {
        let task = self.tasks.get_by_id(id, tz).await?;
        if task.user_id != user_id {
            return Err(ServiceError::Storage(StorageError::NotFound));
        }
        Ok(())
    }
}

fn localize(naive: NaiveDateTime, tz: &str) -> Option<DateTime<FixedOffset>> {
    timezone::resolve(tz).ok()?.from_local(naive)
}

fn format_task_list(items: &[TaskView]) -> String {
    if items.is_empty() {
        return "Nothing here yet. Add a task with /add.".to_owned();
    }
    let mut lines = vec!["Active tasks:".to_owned()];
    for task in items {
        let mut line = format!("{}) {}", task.id, task.text);
        if let Some(due) = task.due_at {
            line.push_str(&format!(" (due {})", format_time(due)));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn format_time(at: DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}
