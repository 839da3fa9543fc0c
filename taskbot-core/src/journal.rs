//! Per-chat record of the last change the bot made, for `/undo`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::sheet::SheetRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastAction {
    Inserted { row: u32, title: String },
    Updated { row: u32, revert_row: Option<SheetRow> },
}

impl LastAction {
    pub fn row(&self) -> u32 {
        match self {
            Self::Inserted { row, .. } | Self::Updated { row, .. } => *row,
        }
    }
}

/// One slot per chat; recording replaces the previous action.
#[derive(Debug, Default)]
pub struct UndoJournal {
    last: Mutex<HashMap<i64, LastAction>>,
}

impl UndoJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, chat_id: i64, action: LastAction) {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, action);
    }

    pub fn take(&self, chat_id: i64) -> Option<LastAction> {
        self.last
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_latest_action_per_chat() {
        let j = UndoJournal::new();
        j.record(1, LastAction::Inserted { row: 5, title: "A".into() });
        j.record(1, LastAction::Updated { row: 4, revert_row: None });
        j.record(2, LastAction::Inserted { row: 9, title: "B".into() });
        assert_eq!(j.take(1).map(|a| a.row()), Some(4));
        assert!(j.take(1).is_none());
        assert_eq!(j.take(2).map(|a| a.row()), Some(9));
    }
}
