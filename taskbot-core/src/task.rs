//! Task model: what gets extracted from chat text and written as a sheet row.

use serde::{Deserialize, Serialize};

/// Status glyphs stored in the sheet's status column.
///
/// The literal tokens must not change; existing sheets already contain them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusGlyph {
    /// In progress / planning.
    InProgress,
    /// Done.
    Done,
    /// High priority / under control.
    Escalated,
}

impl StatusGlyph {
    pub const ALL: [StatusGlyph; 3] = [Self::InProgress, Self::Done, Self::Escalated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "🔄",
            Self::Done => "✅",
            Self::Escalated => "⚠️",
        }
    }

    /// Exact glyph match; a missing emoji variation selector is tolerated.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_end_matches('\u{fe0f}');
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().trim_end_matches('\u{fe0f}') == s)
    }

    /// Human meaning, as shown to the model in the update prompt.
    pub fn meaning(&self) -> &'static str {
        match self {
            Self::InProgress => "В работе / Планирование",
            Self::Done => "Выполнено",
            Self::Escalated => "Высокий приоритет / Контроль",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "высокий")]
    High,
    #[serde(rename = "средний")]
    Medium,
    #[serde(rename = "низкий")]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "высокий",
            Self::Medium => "средний",
            Self::Low => "низкий",
        }
    }

    /// Accepts only the three enumerated values (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "высокий" => Some(Self::High),
            "средний" => Some(Self::Medium),
            "низкий" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A proposed sheet row.
///
/// `deadline`, when present, is always `dd.mm.yyyy`. Absent values are `None`,
/// never empty strings; the sheet adapter blanks them to empty cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub task: String,
    pub responsible: Option<String>,
    pub deadline: Option<String>,
    pub priority: Option<Priority>,
    pub comments: Option<String>,
    pub category: Option<String>,
}

impl TaskCandidate {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            responsible: None,
            deadline: None,
            priority: None,
            comments: None,
            category: None,
        }
    }

    pub fn with_deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Title used in chat replies.
    pub fn title(&self) -> &str {
        if self.task.trim().is_empty() {
            "Задача"
        } else {
            self.task.trim()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyphs_keep_their_literal_tokens() {
        assert_eq!(StatusGlyph::InProgress.as_str(), "🔄");
        assert_eq!(StatusGlyph::Done.as_str(), "✅");
        assert_eq!(StatusGlyph::Escalated.as_str(), "⚠️");
        assert_eq!(StatusGlyph::parse(" ✅ "), Some(StatusGlyph::Done));
        assert_eq!(StatusGlyph::parse("done"), None);
    }

    #[test]
    fn priority_rejects_values_outside_the_enum() {
        assert_eq!(Priority::parse("Высокий"), Some(Priority::High));
        assert_eq!(Priority::parse("низкий"), Some(Priority::Low));
        assert_eq!(Priority::parse("срочно"), None);
        assert_eq!(
            serde_json::to_string(&Priority::Medium).unwrap(),
            "\"средний\""
        );
    }
}
