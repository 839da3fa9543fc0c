//! taskbot-core: task extraction, deadline follow-ups and sheet updates for group chats.
//!
//! Collaborators (language model, spreadsheet backend) are traits; the chat
//! transport lives in the binary crate.

pub mod command;
pub mod desk;
pub mod error;
pub mod extract;
pub mod follow_up;
pub mod journal;
pub mod llm;
pub mod pending;
pub mod sheet;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod time;
pub mod update;

pub use command::{Command, parse_command};
pub use desk::{ChatMessage, Outcome, TaskDesk};
pub use error::{Result, TaskbotError};
pub use extract::{classify_command, detect_task_in_message};
pub use follow_up::{FollowUpResult, resolve_follow_up};
pub use journal::{LastAction, UndoJournal};
pub use llm::{LanguageModel, strip_code_fence};
pub use pending::{PendingKey, PendingStore, PendingTask};
pub use sheet::{SheetBackend, SheetLayout, SheetRow, Table, TaskSheet};
pub use task::{Priority, StatusGlyph, TaskCandidate};
pub use update::{UpdateResolution, apply_update, resolve_update, revert_update};
