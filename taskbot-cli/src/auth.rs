use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};

use crate::state::ensure_taskbot_home;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuthState {
    pub telegram_bot_token: Option<String>,
    pub llm_api_key: Option<String>,
}

impl AuthState {
    /// `TELEGRAM_BOT_TOKEN` and `LLM_API_KEY` win over auth.json.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("LLM_API_KEY").ok(),
        );
    }

    fn apply_overrides(&mut self, telegram: Option<String>, llm: Option<String>) {
        if let Some(t) = non_empty(telegram) {
            self.telegram_bot_token = Some(t);
        }
        if let Some(k) = non_empty(llm) {
            self.llm_api_key = Some(k);
        }
    }

    pub fn telegram_token(&self) -> Result<String> {
        match non_empty(self.telegram_bot_token.clone()) {
            Some(t) => Ok(t),
            None => bail!(
                "missing telegram_bot_token; set TELEGRAM_BOT_TOKEN or run: taskbot auth paste-telegram-token"
            ),
        }
    }

    pub fn llm_key(&self) -> Result<String> {
        match non_empty(self.llm_api_key.clone()) {
            Some(k) => Ok(k),
            None => bail!(
                "missing llm_api_key; set LLM_API_KEY or run: taskbot auth paste-llm-key"
            ),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn auth_path() -> Result<std::path::PathBuf> {
    Ok(ensure_taskbot_home()?.join("auth.json"))
}

/// auth.json merged with environment overrides.
pub fn load_auth() -> Result<AuthState> {
    let mut auth = load_auth_file()?;
    auth.apply_env();
    Ok(auth)
}

fn load_auth_file() -> Result<AuthState> {
    let p = auth_path()?;
    if !p.exists() {
        return Ok(AuthState::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_auth(auth: &AuthState) -> Result<()> {
    let p = auth_path()?;
    let s = serde_json::to_string_pretty(auth)?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

fn prompt_secret(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

pub fn paste_telegram_token() -> Result<()> {
    // env overrides must not leak into the file
    let mut auth = load_auth_file()?;
    let token = prompt_secret("Paste Telegram bot token (from @BotFather)")?;
    if token.is_empty() {
        bail!("empty token");
    }
    auth.telegram_bot_token = Some(token);
    save_auth(&auth)?;
    println!("Saved Telegram bot token to ~/.taskbot/auth.json");
    Ok(())
}

pub fn paste_llm_key() -> Result<()> {
    let mut auth = load_auth_file()?;
    let key = prompt_secret("Paste LLM API key")?;
    if key.is_empty() {
        bail!("empty key");
    }
    auth.llm_api_key = Some(key);
    save_auth(&auth)?;
    println!("Saved LLM API key to ~/.taskbot/auth.json");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_override_file_values() {
        let mut auth = AuthState {
            telegram_bot_token: Some("file-token".into()),
            llm_api_key: None,
        };
        auth.apply_overrides(Some("  ".into()), Some("sk-env".into()));
        assert_eq!(auth.telegram_token().unwrap(), "file-token");
        assert_eq!(auth.llm_key().unwrap(), "sk-env");
    }

    #[test]
    fn missing_secrets_name_the_fix() {
        let err = AuthState::default().telegram_token().unwrap_err();
        assert!(err.to_string().contains("paste-telegram-token"));
    }
}
