//! Conversation state machine: one inbound chat message in, one outcome out.
//!
//! Plain messages go to the deadline follow-up when the sender has a pending
//! task, otherwise to task detection. A detected task without a deadline is
//! parked in the pending store and the sender is asked for one; a task with a
//! deadline is written straight to the sheet. Commands (`/add`, `/update`,
//! `/undo`, `/cancel`) are handled separately.
//!
//! Every failure stays scoped to the message that caused it.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::command::{Command, looks_like_command, parse_command};
use crate::extract::{classify_command, detect_task_in_message};
use crate::follow_up::{FollowUpResult, resolve_follow_up};
use crate::journal::{LastAction, UndoJournal};
use crate::llm::LanguageModel;
use crate::pending::{PendingKey, PendingStore, PendingTask};
use crate::sheet::{SheetBackend, TaskSheet};
use crate::task::TaskCandidate;
use crate::update::{apply_update, resolve_update, revert_update};

/// An inbound text message, already stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub user_id: u64,
    pub message_id: i32,
    pub text: String,
}

impl ChatMessage {
    pub fn key(&self) -> PendingKey {
        PendingKey::new(self.chat_id, self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to say: not a task, unknown command, or a swallowed failure.
    Ignored,
    AskedDeadline { task: String },
    AskedAgain { task: String },
    Added { row: u32, title: String },
    Declined { task: String },
    Cancelled { task: String },
    NothingPending,
    Updated { row: u32, reply: String },
    TaskNotFound,
    NothingToChange,
    NotUnderstood,
    /// `title` is set when the undone change was an insert.
    Undone { row: u32, title: Option<String> },
    NothingToUndo,
    UndoUnavailable,
    StorageFailed { what: &'static str },
    Usage,
    Help,
}

const HELP: &str = "Я слежу за поручениями в этом чате и записываю их в таблицу.\n\
/add <текст> — добавить задачу\n\
/update <текст> — изменить задачу (срок, статус, ответственного…)\n\
/undo — отменить последнее изменение\n\
/cancel — не добавлять задачу, для которой я жду срок";

impl Outcome {
    /// Text to send back, threaded to the triggering message.
    pub fn reply_text(&self) -> Option<String> {
        let text = match self {
            Self::Ignored => return None,
            Self::AskedDeadline { task } => format!(
                "Вижу задачу «{task}», но без срока. Какой срок поставить? \
                 Напишите дату или, например, «к пятнице». \
                 Если срок пока неизвестен, напишите «не добавлять»."
            ),
            Self::AskedAgain { task } => format!(
                "Не понял срок для задачи «{task}». Напишите дату \
                 (например, 25.10.2026 или «через 2 дня») или «не добавлять»."
            ),
            Self::Added { title, .. } => format!("Задача добавлена в таблицу: «{title}»"),
            Self::Declined { task } | Self::Cancelled { task } => {
                format!("Хорошо, задачу «{task}» не добавляю.")
            }
            Self::NothingPending => "Нет задач, для которых я жду срок.".to_string(),
            Self::Updated { reply, .. } => reply.clone(),
            Self::TaskNotFound => "Не нашёл задачу, о которой идёт речь.".to_string(),
            Self::NothingToChange => "Не понял, что нужно изменить в задаче.".to_string(),
            Self::NotUnderstood => {
                "Не удалось разобрать команду, попробуйте сформулировать иначе.".to_string()
            }
            Self::Undone {
                title: Some(title), ..
            } => format!("Убрал из таблицы задачу «{title}»."),
            Self::Undone { row, title: None } => {
                format!("Отменил последнее изменение (строка {row}).")
            }
            Self::NothingToUndo => "Нечего отменять.".to_string(),
            Self::UndoUnavailable => {
                "Не могу отменить: исходные значения строки не сохранились.".to_string()
            }
            Self::StorageFailed { what } => format!("Не удалось {what}: таблица недоступна."),
            Self::Usage => "Напишите текст после команды, например: \
                            /add Петров, подготовить отчёт к пятнице"
                .to_string(),
            Self::Help => HELP.to_string(),
        };
        Some(text)
    }
}

pub struct TaskDesk<L, B> {
    model: L,
    sheet: TaskSheet<B>,
    pending: PendingStore,
    journal: UndoJournal,
}

impl<L: LanguageModel, B: SheetBackend> TaskDesk<L, B> {
    pub fn new(model: L, sheet: TaskSheet<B>) -> Self {
        Self {
            model,
            sheet,
            pending: PendingStore::new(),
            journal: UndoJournal::new(),
        }
    }

    pub fn with_pending_store(mut self, pending: PendingStore) -> Self {
        self.pending = pending;
        self
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn sheet(&self) -> &TaskSheet<B> {
        &self.sheet
    }

    pub fn model(&self) -> &L {
        &self.model
    }

    /// Handle one message. `now` is local time in the sheet's timezone.
    pub async fn handle(&self, msg: &ChatMessage, now: DateTime<Tz>) -> Outcome {
        let text = msg.text.trim();
        if text.is_empty() {
            return Outcome::Ignored;
        }
        if looks_like_command(text) {
            return match parse_command(text) {
                Some((cmd, arg)) => self.handle_command(msg, cmd, arg, now).await,
                None => Outcome::Ignored,
            };
        }
        self.handle_chat(msg, text, now).await
    }

    async fn handle_chat(&self, msg: &ChatMessage, text: &str, now: DateTime<Tz>) -> Outcome {
        let key = msg.key();
        let today = now.date_naive();

        if let Some(pending) = self.pending.take(&key, now.with_timezone(&Utc)) {
            return match resolve_follow_up(&self.model, &pending.task, text, today).await {
                FollowUpResult::Add(deadline) => {
                    info!(
                    chat_id = msg.chat_id,
                    user_id = msg.user_id,
                    %deadline,
                    "deadline supplied"
                );
                    let task = pending.complete(deadline);
                    self.insert(msg.chat_id, task, now).await
                }
                FollowUpResult::Decline => {
                    info!(chat_id = msg.chat_id, user_id = msg.user_id, "pending task declined");
                    Outcome::Declined { task: pending.task }
                }
                FollowUpResult::Unclear => {
                    let task = pending.task.clone();
                    self.pending.restore(key, pending);
                    Outcome::AskedAgain { task }
                }
            };
        }

        match detect_task_in_message(&self.model, text, today).await {
            Ok(Some(task)) => self.route(msg, task, now).await,
            Ok(None) => Outcome::Ignored,
            Err(e) => {
                warn!(chat_id = msg.chat_id, error = %e, "task detection failed; ignoring message");
                Outcome::Ignored
            }
        }
    }

    /// Park deadline-less tasks; write the rest.
    async fn route(&self, msg: &ChatMessage, task: TaskCandidate, now: DateTime<Tz>) -> Outcome {
        if task.has_deadline() {
            return self.insert(msg.chat_id, task, now).await;
        }
        let pending = PendingTask::new(task, now.with_timezone(&Utc));
        let title = pending.task.clone();
        info!(
            chat_id = msg.chat_id,
            user_id = msg.user_id,
            task = %title,
            "task without deadline; asking"
        );
        self.pending.put(msg.key(), pending);
        Outcome::AskedDeadline { task: title }
    }

    async fn insert(&self, chat_id: i64, task: TaskCandidate, now: DateTime<Tz>) -> Outcome {
        let title = task.title().to_string();
        match self.sheet.insert_task(&task, &now, None).await {
            Ok(row) => {
                info!(chat_id, row, task = %title, "task written");
                self.journal.record(
                    chat_id,
                    LastAction::Inserted {
                        row,
                        title: title.clone(),
                    },
                );
                Outcome::Added { row, title }
            }
            Err(e) => {
                error!(chat_id, error = %e, "could not write task");
                Outcome::StorageFailed {
                    what: "записать задачу",
                }
            }
        }
    }

    async fn handle_command(
        &self,
        msg: &ChatMessage,
        cmd: Command,
        arg: &str,
        now: DateTime<Tz>,
    ) -> Outcome {
        if cmd.takes_argument() && arg.is_empty() {
            return Outcome::Usage;
        }
        match cmd {
            Command::Add => self.add(msg, arg, now).await,
            Command::Update => self.update(msg, arg, now).await,
            Command::Undo => self.undo(msg.chat_id).await,
            Command::Cancel => match self.pending.delete(&msg.key()) {
                Some(p) => Outcome::Cancelled { task: p.task },
                None => Outcome::NothingPending,
            },
            Command::Help => Outcome::Help,
        }
    }

    async fn add(&self, msg: &ChatMessage, text: &str, now: DateTime<Tz>) -> Outcome {
        match classify_command(&self.model, text, now.date_naive()).await {
            Ok(task) => self.route(msg, task, now).await,
            Err(e) => {
                warn!(chat_id = msg.chat_id, error = %e, "could not extract task from command");
                Outcome::NotUnderstood
            }
        }
    }

    async fn update(&self, msg: &ChatMessage, text: &str, now: DateTime<Tz>) -> Outcome {
        let resolution =
            match resolve_update(&self.model, &self.sheet, text, now.date_naive(), None).await {
                Ok(r) => r,
                Err(e) if e.is_storage() => {
                    error!(chat_id = msg.chat_id, error = %e, "could not read table");
                    return Outcome::StorageFailed {
                        what: "прочитать таблицу",
                    };
                }
                Err(e) => {
                    warn!(chat_id = msg.chat_id, error = %e, "update resolution failed");
                    return Outcome::NotUnderstood;
                }
            };
        if resolution.matched_rows.is_empty() {
            return Outcome::TaskNotFound;
        }
        if resolution.changes.is_empty() {
            return Outcome::NothingToChange;
        }
        match apply_update(&self.sheet, &resolution, None).await {
            Ok(row) => {
                info!(
                    chat_id = msg.chat_id,
                    row,
                    changes = resolution.changes.len(),
                    "task updated"
                );
                self.journal.record(
                    msg.chat_id,
                    LastAction::Updated {
                        row,
                        revert_row: resolution.revert_row.clone(),
                    },
                );
                let reply = if resolution.chat_reply.is_empty() {
                    format!("Обновил задачу в строке {row}.")
                } else {
                    resolution.chat_reply
                };
                Outcome::Updated { row, reply }
            }
            Err(e) if e.is_storage() => {
                error!(chat_id = msg.chat_id, error = %e, "could not apply update");
                Outcome::StorageFailed {
                    what: "обновить задачу",
                }
            }
            Err(e) => {
                warn!(chat_id = msg.chat_id, error = %e, "nothing written for update");
                Outcome::NothingToChange
            }
        }
    }

    async fn undo(&self, chat_id: i64) -> Outcome {
        let Some(action) = self.journal.take(chat_id) else {
            return Outcome::NothingToUndo;
        };
        let result = match &action {
            LastAction::Inserted { row, .. } => self.sheet.clear_task_row(*row, None).await,
            LastAction::Updated {
                revert_row: Some(snapshot),
                ..
            } => revert_update(&self.sheet, snapshot, None).await.map(|_| ()),
            LastAction::Updated {
                revert_row: None, ..
            } => return Outcome::UndoUnavailable,
        };
        match result {
            Ok(()) => {
                let row = action.row();
                info!(chat_id, row, "last change undone");
                let title = match action {
                    LastAction::Inserted { title, .. } => Some(title),
                    LastAction::Updated { .. } => None,
                };
                Outcome::Undone { row, title }
            }
            Err(e) => {
                error!(chat_id, error = %e, "undo failed");
                self.journal.record(chat_id, action);
                Outcome::StorageFailed {
                    what: "отменить изменение",
                }
            }
        }
    }
}
