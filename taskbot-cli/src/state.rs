use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$TASKBOT_HOME`, or `~/.taskbot`.
pub fn taskbot_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TASKBOT_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".taskbot"))
}

pub fn ensure_taskbot_home() -> Result<PathBuf> {
    let dir = taskbot_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}
