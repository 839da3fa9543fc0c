//! Bot command parsing (`/add@MyBot text`).

use std::sync::LazyLock;

use regex::Regex;

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Record a task from an explicit request.
    Add,
    /// Change an existing row.
    Update,
    /// Reverse the chat's last change.
    Undo,
    /// Drop the sender's pending task.
    Cancel,
    Help,
}

impl Command {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "add" | "task" => Some(Self::Add),
            "update" | "edit" => Some(Self::Update),
            "undo" => Some(Self::Undo),
            "cancel" => Some(Self::Cancel),
            "help" | "start" => Some(Self::Help),
            _ => None,
        }
    }

    pub fn takes_argument(&self) -> bool {
        matches!(self, Self::Add | Self::Update)
    }
}

/// Split a message into a known command and its argument text.
///
/// `None` for plain text and for commands this bot does not know.
pub fn parse_command(text: &str) -> Option<(Command, &str)> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let cmd = Command::from_name(caps.get(1)?.as_str())?;
    let arg = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((cmd, arg))
}

/// True for anything shaped like a bot command, known or not.
pub fn looks_like_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}
