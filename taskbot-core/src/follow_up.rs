//! Deadline follow-up: classify a reply to "what's the deadline?".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::llm::{LanguageModel, decode_json, non_blank};
use crate::time::{format_date, normalize_deadline};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowUpResult {
    /// The user supplied a deadline (`dd.mm.yyyy`).
    Add(String),
    /// The user does not want the task recorded.
    Decline,
    /// Anything else; the caller re-prompts.
    Unclear,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFollowUp {
    action: Option<String>,
    deadline: Option<String>,
}

impl RawFollowUp {
    fn interpret(self) -> FollowUpResult {
        let action = non_blank(self.action).unwrap_or_default().to_lowercase();
        match action.as_str() {
            "add" => non_blank(self.deadline)
                .and_then(|d| normalize_deadline(&d))
                .map(FollowUpResult::Add)
                .unwrap_or(FollowUpResult::Unclear),
            "decline" => FollowUpResult::Decline,
            _ => FollowUpResult::Unclear,
        }
    }
}

pub fn follow_up_prompt(task: &str, reply: &str, today: NaiveDate) -> String {
    format!(
        r#"Сегодняшняя дата: {today}

Ранее пользователь поставил задачу (без срока): «{task}»
Его новое сообщение: «{reply}»

Определи по смыслу сообщения одно из трёх:
1) Пользователь УКАЗЫВАЕТ СРОК для этой задачи (дата, «к пятнице», «через 2 дня», «до конца недели» и т.п.) → верни JSON: {{"action": "add", "deadline": "дд.мм.гггг"}}. Дата только в формате дд.мм.гггг, относительные формулировки переведи относительно сегодня.
2) Пользователь ОТКАЗЫВАЕТСЯ от добавления задачи: срок неизвестен, пока не ставить, не добавлять, отмена и т.п. → верни JSON: {{"action": "decline"}}
3) Непонятно или не относится к задаче → верни JSON: {{"action": "unclear"}}

Ответ — только один JSON, без markdown и пояснений."#,
        today = format_date(today),
        task = task.trim(),
        reply = reply.trim(),
    )
}

async fn try_resolve<L: LanguageModel>(
    model: &L,
    task: &str,
    reply: &str,
    today: NaiveDate,
) -> Result<FollowUpResult> {
    let response = model
        .complete(&follow_up_prompt(task, reply, today))
        .await?;
    Ok(decode_json::<RawFollowUp>(&response)?.interpret())
}

/// Classify `reply` against the pending task wording.
///
/// Never fails: call and decode errors come back as `Unclear`, so the user is
/// asked again rather than having the task guessed or dropped.
pub async fn resolve_follow_up<L: LanguageModel>(
    model: &L,
    task: &str,
    reply: &str,
    today: NaiveDate,
) -> FollowUpResult {
    if reply.trim().is_empty() {
        return FollowUpResult::Unclear;
    }
    match try_resolve(model, task, reply, today).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "follow-up resolution failed; treating as unclear");
            FollowUpResult::Unclear
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskbotError;
    use crate::testing::ScriptedModel;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    async fn resolve(response: &str) -> FollowUpResult {
        let model = ScriptedModel::new().reply(response);
        resolve_follow_up(&model, "Прислать отчёт", "ответ", today()).await
    }

    #[tokio::test]
    async fn maps_the_three_buckets() {
        assert_eq!(
            resolve(r#"{"action": "add", "deadline": "23.10.2026"}"#).await,
            FollowUpResult::Add("23.10.2026".to_string())
        );
        assert_eq!(resolve(r#"{"action": "Decline"}"#).await, FollowUpResult::Decline);
        assert_eq!(resolve(r#"{"action": "unclear"}"#).await, FollowUpResult::Unclear);
    }

    #[tokio::test]
    async fn add_without_deadline_is_unclear() {
        assert_eq!(resolve(r#"{"action": "add"}"#).await, FollowUpResult::Unclear);
        assert_eq!(
            resolve(r#"{"action": "add", "deadline": "  "}"#).await,
            FollowUpResult::Unclear
        );
        assert_eq!(
            resolve(r#"{"action": "add", "deadline": "в пятницу"}"#).await,
            FollowUpResult::Unclear
        );
        assert_eq!(
            resolve(r#"{"action": "add", "deadline": "20.10.26"}"#).await,
            FollowUpResult::Unclear
        );
    }

    #[tokio::test]
    async fn failures_are_unclear() {
        assert_eq!(resolve("not json").await, FollowUpResult::Unclear);
        assert_eq!(resolve(r#"{"action": "maybe"}"#).await, FollowUpResult::Unclear);

        let model = ScriptedModel::new().fail(TaskbotError::call("502"));
        assert_eq!(
            resolve_follow_up(&model, "Отчёт", "к пятнице", today()).await,
            FollowUpResult::Unclear
        );
    }

    #[tokio::test]
    async fn prompt_quotes_task_and_reply() {
        let model = ScriptedModel::new().reply(r#"{"action": "decline"}"#);
        resolve_follow_up(&model, "Прислать отчёт", " пока не надо ", today()).await;
        let prompt = model.last_prompt().unwrap();
        assert!(prompt.contains("«Прислать отчёт»"));
        assert!(prompt.contains("«пока не надо»"));
        assert!(prompt.contains("18.10.2026"));
    }
}
