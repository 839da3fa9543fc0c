//! Extraction engine: chat text to a structured task candidate.
//!
//! Both entry points make exactly one model call and fail closed: a call or
//! decode failure is an error, never a defaulted candidate.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Result, TaskbotError};
use crate::llm::{LanguageModel, decode_json, non_blank};
use crate::task::{Priority, TaskCandidate};
use crate::time::{format_date, normalize_deadline};

/// Loose shape of the model's answer; validated by [`RawTask::validate`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTask {
    is_task: Option<bool>,
    task: Option<String>,
    responsible: Option<String>,
    deadline: Option<String>,
    priority: Option<String>,
    comments: Option<String>,
    category: Option<String>,
}

impl RawTask {
    fn validate(self) -> Result<TaskCandidate> {
        let task = non_blank(self.task)
            .ok_or_else(|| TaskbotError::validation("model returned a task without a title"))?;
        Ok(TaskCandidate {
            task,
            responsible: non_blank(self.responsible),
            deadline: non_blank(self.deadline).and_then(|d| normalize_deadline(&d)),
            priority: non_blank(self.priority).and_then(|p| Priority::parse(&p)),
            comments: non_blank(self.comments),
            category: non_blank(self.category),
        })
    }
}

pub fn command_prompt(command: &str, today: NaiveDate) -> String {
    format!(
        r#"Сегодняшняя дата: {today}

Пользователь прислал команду для создания задачи:
«{command}»

Извлеки из команды данные и верни ТОЛЬКО валидный JSON без markdown и пояснений. Схема:

{{
  "task": "Лаконичное название задачи (1-10 слов). Переформулируй хаотичное описание в чёткую формулировку.",
  "responsible": "Имя ответственного в именительном падеже. Если не указано — null.",
  "deadline": "Дата в формате дд.мм.гггг. Учитывай относительные формулировки («через 2 дня», «к пятнице», «до конца недели») относительно сегодняшней даты. Если не указано — null.",
  "priority": "Приоритет: «высокий», «средний» или «низкий». Приведи к одному из этих значений. Если не указано — null.",
  "comments": "Комментарии, подзадачи, уточнения — только если пользователь прямо просит что-то записать в комментарий. Иначе null.",
  "category": "Категория задачи, если она понятна из команды. Иначе null."
}}

Ответ — только JSON:"#,
        today = format_date(today),
        command = command.trim(),
    )
}

pub fn chat_prompt(message: &str, today: NaiveDate) -> String {
    format!(
        r#"Сегодняшняя дата: {today}

Сообщение в рабочем чате:
«{message}»

Определи: есть ли здесь постановка задачи — то есть кто-то явно или по смыслу поручает другому человеку (или группе) что-то сделать. Обычные обсуждения, вопросы, благодарности, приветствия, новости без поручения — не задача.

Ответ — ТОЛЬКО один JSON без markdown и пояснений.

Если постановки задачи НЕТ — верни: {{"is_task": false}}

Если постановка задачи ЕСТЬ — верни JSON с полями:
{{
  "is_task": true,
  "task": "Краткое название задачи (1-10 слов), чёткая формулировка.",
  "responsible": "Имя ответственного в именительном падеже. Если не указано — null.",
  "deadline": "Дата в формате дд.мм.гггг (относительные формулировки вроде «через 2 дня», «к пятнице», «до конца недели» переведи относительно сегодня). Если не указано — null.",
  "priority": "«высокий», «средний» или «низкий». Если не указано — null.",
  "comments": "null, если пользователь прямо не просит что-то отметить в комментарии.",
  "category": "Категория задачи, если из контекста понятна. Иначе null."
}}

Ответ — только JSON:"#,
        today = format_date(today),
        message = message.trim(),
    )
}

/// Treat `command` as an explicit task-creation request.
pub async fn classify_command<L: LanguageModel>(
    model: &L,
    command: &str,
    today: NaiveDate,
) -> Result<TaskCandidate> {
    if command.trim().is_empty() {
        return Err(TaskbotError::validation("empty command"));
    }
    let response = model.complete(&command_prompt(command, today)).await?;
    decode_json::<RawTask>(&response)?.validate()
}

/// Decide whether an ordinary chat message assigns a task.
///
/// `Ok(None)` means the message carries no delegation.
pub async fn detect_task_in_message<L: LanguageModel>(
    model: &L,
    message: &str,
    today: NaiveDate,
) -> Result<Option<TaskCandidate>> {
    if message.trim().is_empty() {
        return Ok(None);
    }
    let response = model.complete(&chat_prompt(message, today)).await?;
    let raw: RawTask = decode_json(&response)?;
    if raw.is_task != Some(true) {
        return Ok(None);
    }
    raw.validate().map(Some)
}
