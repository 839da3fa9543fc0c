use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskbot_core::time::{local_now, parse_timezone};
use taskbot_core::{
    PendingStore, TaskDesk, TaskSheet, apply_update, detect_task_in_message, resolve_update,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod llm;
mod sheets;
mod state;
mod telegram;

use crate::config::Config;
use crate::llm::ChatCompletions;
use crate::sheets::GoogleSheets;

#[derive(Parser, Debug)]
#[command(name = "taskbot", version, about = "Group-chat task tracker backed by Google Sheets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to Telegram and process group messages until Ctrl-C
    Run,

    /// Run task detection on a message and print the result (no writes)
    Extract {
        /// Message text
        text: String,
    },

    /// Resolve an update command against the sheet and print the resolution
    Update {
        /// Free-text update command
        text: String,

        /// Write the changes (default: dry run)
        #[arg(long)]
        apply: bool,
    },

    /// Write a default ~/.taskbot/config.toml
    InitConfig,

    /// Store secrets in ~/.taskbot/auth.json
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Paste the bot token issued by @BotFather
    PasteTelegramToken,

    /// Paste the API key for the chat-completions endpoint
    PasteLlmKey,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    telegram::alias_proxy_env()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("create tokio runtime")?
        .block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run => run().await?,
        Command::Extract { text } => extract(&text).await?,
        Command::Update { text, apply } => update(&text, apply).await?,
        Command::InitConfig => config::init_config()?,
        Command::Auth { command } => match command {
            AuthCommand::PasteTelegramToken => auth::paste_telegram_token()?,
            AuthCommand::PasteLlmKey => auth::paste_llm_key()?,
        },
    }
    Ok(())
}

fn build_model(cfg: &Config) -> Result<ChatCompletions> {
    let key = auth::load_auth()?.llm_key()?;
    ChatCompletions::new(&cfg.llm, key)
}

async fn build_sheet(cfg: &Config) -> Result<TaskSheet<GoogleSheets>> {
    cfg.validate()?;
    let credentials = PathBuf::from(&cfg.sheet.credentials_path);
    if !credentials.exists() {
        bail!(
            "service account key not found: {} (set sheet.credentials_path or CREDENTIALS_PATH)",
            credentials.display()
        );
    }
    let backend = GoogleSheets::connect(&credentials, &cfg.sheet.spreadsheet_id).await?;
    Ok(TaskSheet::new(backend)
        .with_layout(cfg.layout())
        .with_worksheet(cfg.sheet.worksheet.clone()))
}

async fn run() -> Result<()> {
    let cfg = config::load_config()?;
    let tz = parse_timezone(&cfg.bot.timezone)?;
    let token = auth::load_auth()?.telegram_token()?;
    let model = build_model(&cfg)?;
    let sheet = build_sheet(&cfg).await?;

    info!(
        build = env!("TASKBOT_BUILD_SHA"),
        model = model.model(),
        spreadsheet = %cfg.sheet.spreadsheet_id,
        timezone = %tz,
        "starting taskbot"
    );

    let pending = PendingStore::new().with_max_age(cfg.pending_ttl()?);
    let desk = TaskDesk::new(model, sheet).with_pending_store(pending);
    telegram::run_bot(token, desk, tz).await
}

async fn extract(text: &str) -> Result<()> {
    let cfg = config::load_config()?;
    let tz = parse_timezone(&cfg.bot.timezone)?;
    let model = build_model(&cfg)?;

    let today = local_now(tz).date_naive();
    match detect_task_in_message(&model, text, today).await? {
        Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
        None => println!("(not a task)"),
    }
    Ok(())
}

async fn update(text: &str, apply: bool) -> Result<()> {
    let cfg = config::load_config()?;
    let tz = parse_timezone(&cfg.bot.timezone)?;
    let model = build_model(&cfg)?;
    let sheet = build_sheet(&cfg).await?;

    let today = local_now(tz).date_naive();
    let res = resolve_update(&model, &sheet, text, today, None).await?;
    let changes: serde_json::Map<String, serde_json::Value> = res
        .changes
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    let report = serde_json::json!({
        "matched_rows": res.matched_rows,
        "changes": changes,
        "chat_reply": res.chat_reply,
        "revert_row": res.revert_row.as_ref().map(|r| r.to_json()),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !apply {
        return Ok(());
    }
    if res.matched_rows.is_empty() || res.changes.is_empty() {
        bail!("nothing to apply");
    }
    let row = apply_update(&sheet, &res, None).await?;
    println!("Updated row {row}");
    Ok(())
}
