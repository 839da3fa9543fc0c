//! Long-polling Telegram transport.
//!
//! teloxide runs updates of one chat sequentially, so a chat never has two
//! turns in flight; different chats proceed concurrently. Sheet appends are
//! serialized inside `TaskSheet::insert_task`.

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use taskbot_core::time::local_now;
use taskbot_core::{ChatMessage, LanguageModel, SheetBackend, TaskDesk, TaskbotError};
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::dptree;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::{Chat, ReplyParameters, UserId};
use tracing::{debug, info, warn};

const ADMIN_CHECK_TTL: Duration = Duration::from_secs(600);

pub struct BotState<L, B> {
    desk: TaskDesk<L, B>,
    tz: Tz,
    me: UserId,
    admin_cache: Mutex<HashMap<ChatId, (bool, Instant)>>,
}

impl<L: LanguageModel, B: SheetBackend> BotState<L, B> {
    pub fn new(desk: TaskDesk<L, B>, tz: Tz, me: UserId) -> Self {
        Self {
            desk,
            tz,
            me,
            admin_cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached_admin(&self, chat: ChatId) -> Option<bool> {
        let cache = self.admin_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(&chat)
            .filter(|(_, at)| at.elapsed() < ADMIN_CHECK_TTL)
            .map(|(ok, _)| *ok)
    }

    fn remember_admin(&self, chat: ChatId, ok: bool) {
        self.admin_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat, (ok, Instant::now()));
    }

    /// The bot works only in groups where it is administrator or owner.
    async fn may_act_in(&self, bot: &Bot, msg: &Message) -> bool {
        if !is_group(&msg.chat) {
            return false;
        }
        if let Some(ok) = self.cached_admin(msg.chat.id) {
            return ok;
        }
        match bot.get_chat_member(msg.chat.id, self.me).await {
            Ok(member) => {
                let ok = member.is_privileged();
                if !ok {
                    info!(
                        chat_id = msg.chat.id.0,
                        "bot is not an administrator here; staying silent"
                    );
                }
                self.remember_admin(msg.chat.id, ok);
                ok
            }
            Err(e) => {
                warn!(chat_id = msg.chat.id.0, error = %e, "admin check failed; ignoring message");
                false
            }
        }
    }
}

fn is_group(chat: &Chat) -> bool {
    chat.is_group() || chat.is_supergroup()
}

/// Strip transport details. `None` for non-text messages and anonymous senders.
fn to_chat_message(msg: &Message) -> Option<ChatMessage> {
    let text = msg.text()?;
    let user = msg.from.as_ref()?;
    if user.is_bot {
        return None;
    }
    Some(ChatMessage {
        chat_id: msg.chat.id.0,
        user_id: user.id.0,
        message_id: msg.id.0,
        text: text.to_string(),
    })
}

async fn send_reply(bot: &Bot, msg: &Message, text: String) -> taskbot_core::Result<()> {
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await
        .map(|_| ())
        .map_err(|e| TaskbotError::transport(e.to_string()))
}

async fn on_message<L, B>(bot: Bot, msg: Message, state: Arc<BotState<L, B>>) -> ResponseResult<()>
where
    L: LanguageModel + 'static,
    B: SheetBackend + 'static,
{
    let Some(chat_msg) = to_chat_message(&msg) else {
        return Ok(());
    };
    if !state.may_act_in(&bot, &msg).await {
        return Ok(());
    }

    let outcome = state.desk.handle(&chat_msg, local_now(state.tz)).await;
    debug!(chat_id = chat_msg.chat_id, user_id = chat_msg.user_id, ?outcome, "turn handled");

    if let Some(text) = outcome.reply_text() {
        if let Err(e) = send_reply(&bot, &msg, text).await {
            warn!(chat_id = chat_msg.chat_id, error = %e, "could not send reply");
        }
    }
    Ok(())
}

/// Verify the token, then poll until Ctrl-C.
pub async fn run_bot<L, B>(token: String, desk: TaskDesk<L, B>, tz: Tz) -> Result<()>
where
    L: LanguageModel + 'static,
    B: SheetBackend + 'static,
{
    let bot = Bot::with_client(token, teloxide::net::client_from_env());

    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => bail!("telegram authentication failed: {e}"),
    };
    info!(
        username = me.username.as_deref().unwrap_or("unknown"),
        id = me.id.0,
        "bot authenticated"
    );

    if let Err(e) = bot.delete_webhook().await {
        warn!(error = %e, "failed to delete webhook; continuing");
    }

    let state = Arc::new(BotState::new(desk, tz, me.id));
    let handler = dptree::entry().branch(Update::filter_message().endpoint(on_message::<L, B>));

    info!("starting long polling");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!(?upd, "unhandled update");
        })
        .error_handler(LoggingErrorHandler::with_custom_text("error in message handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped");
    Ok(())
}

/// Copy `TELEGRAM_PROXY` into teloxide's `TELOXIDE_PROXY`.
///
/// Must run before any threads exist.
pub fn alias_proxy_env() -> Result<()> {
    let Ok(proxy) = std::env::var("TELEGRAM_PROXY") else {
        return Ok(());
    };
    let proxy = proxy.trim();
    if proxy.is_empty() || std::env::var_os("TELOXIDE_PROXY").is_some() {
        return Ok(());
    }
    reqwest::Url::parse(proxy).context("TELEGRAM_PROXY is not a valid URL")?;
    // SAFETY: called from `main` before the async runtime starts any threads.
    unsafe { std::env::set_var("TELOXIDE_PROXY", proxy) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn group_text(from: serde_json::Value, text: &str) -> Message {
        message(serde_json::json!({
            "message_id": 42,
            "date": 1_760_000_000,
            "chat": {"id": -1001, "type": "supergroup", "title": "Команда"},
            "from": from,
            "text": text,
        }))
    }

    #[test]
    fn maps_group_text_to_chat_message() {
        let msg = group_text(
            serde_json::json!({"id": 7, "is_bot": false, "first_name": "Иван"}),
            "Егоров, пришли отчёт",
        );
        assert!(is_group(&msg.chat));
        assert_eq!(
            to_chat_message(&msg),
            Some(ChatMessage {
                chat_id: -1001,
                user_id: 7,
                message_id: 42,
                text: "Егоров, пришли отчёт".into(),
            })
        );
    }

    #[test]
    fn skips_bots_and_private_chats() {
        let from_bot = group_text(
            serde_json::json!({"id": 8, "is_bot": true, "first_name": "Other"}),
            "hi",
        );
        assert_eq!(to_chat_message(&from_bot), None);

        let private = message(serde_json::json!({
            "message_id": 1,
            "date": 1_760_000_000,
            "chat": {"id": 7, "type": "private", "first_name": "Иван"},
            "from": {"id": 7, "is_bot": false, "first_name": "Иван"},
            "text": "hi",
        }));
        assert!(!is_group(&private.chat));
    }
}
