use anyhow::{Context, Result, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use taskbot_core::SheetLayout;
use taskbot_core::time::DEFAULT_TIMEZONE;

use crate::state::ensure_taskbot_home;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmSection,
    pub sheet: SheetSection,
    pub bot: BotSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSection {
    /// OpenAI-compatible endpoint, without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSection {
    pub spreadsheet_id: String,
    /// Service-account key JSON.
    pub credentials_path: String,
    /// Tab name; the first tab when unset.
    pub worksheet: Option<String>,
    pub header_row: u32,
    pub first_column: u32,
    /// Column used to find the last filled row.
    pub anchor_column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSection {
    pub timezone: String,
    /// Forget unanswered deadline questions after this long. Unset keeps them.
    pub pending_ttl_minutes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let layout = SheetLayout::default();
        Self {
            llm: LlmSection {
                base_url: "https://api.vsegpt.ru/v1".to_string(),
                model: "openai/gpt-5-mini".to_string(),
                temperature: 0.0,
            },
            sheet: SheetSection {
                spreadsheet_id: String::new(),
                credentials_path: "credentials.json".to_string(),
                worksheet: None,
                header_row: layout.header_row,
                first_column: layout.first_column,
                anchor_column: layout.anchor_column,
            },
            bot: BotSection {
                timezone: DEFAULT_TIMEZONE.to_string(),
                pending_ttl_minutes: None,
            },
        }
    }
}

impl Config {
    pub fn layout(&self) -> SheetLayout {
        SheetLayout {
            header_row: self.sheet.header_row,
            first_column: self.sheet.first_column,
            anchor_column: self.sheet.anchor_column,
        }
    }

    /// `SPREADSHEET_ID` and `CREDENTIALS_PATH` win over the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("SPREADSHEET_ID").ok(),
            std::env::var("CREDENTIALS_PATH").ok(),
        );
    }

    fn apply_overrides(
        &mut self,
        spreadsheet_id: Option<String>,
        credentials_path: Option<String>,
    ) {
        if let Some(id) = spreadsheet_id.filter(|s| !s.trim().is_empty()) {
            self.sheet.spreadsheet_id = id.trim().to_string();
        }
        if let Some(path) = credentials_path.filter(|s| !s.trim().is_empty()) {
            self.sheet.credentials_path = path.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sheet.spreadsheet_id.trim().is_empty() {
            bail!("sheet.spreadsheet_id is empty; set it in config.toml or SPREADSHEET_ID");
        }
        if self.sheet.first_column == 0 || self.sheet.header_row == 0 {
            bail!("sheet rows and columns are 1-based");
        }
        if self.sheet.anchor_column < self.sheet.first_column
            || self.sheet.anchor_column > self.layout().last_column()
        {
            bail!(
                "sheet.anchor_column {} is outside the task columns",
                self.sheet.anchor_column
            );
        }
        self.pending_ttl()?;
        Ok(())
    }

    /// `bot.pending_ttl_minutes` as a duration; `None` keeps pending tasks forever.
    pub fn pending_ttl(&self) -> Result<Option<Duration>> {
        let Some(minutes) = self.bot.pending_ttl_minutes else {
            return Ok(None);
        };
        match i64::try_from(minutes).ok().and_then(Duration::try_minutes) {
            Some(ttl) => Ok(Some(ttl)),
            None => bail!("bot.pending_ttl_minutes {minutes} is out of range"),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_taskbot_home()?.join("config.toml"))
}

/// config.toml merged with environment overrides; defaults when the file is missing.
pub fn load_config() -> Result<Config> {
    let mut cfg = read_config(&config_path()?)?;
    cfg.apply_env();
    Ok(cfg)
}

fn read_config(p: &Path) -> Result<Config> {
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

fn write_config(p: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    write_config(&p, &Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

/// Strip a provider prefix the endpoint doesn't expect (`openai-codex/gpt-5.1` -> `gpt-5.1`).
///
/// Routers such as vsegpt take `openai/...` as-is, so only the codex alias is rewritten.
pub fn normalize_model(model: &str) -> String {
    model
        .trim()
        .strip_prefix("openai-codex/")
        .unwrap_or(model.trim())
        .to_string()
}
