//! Pending-task store: tasks waiting for the sender to name a deadline.
//!
//! Keyed by (chat, user). Entries are replaced or removed, never edited.
//! Nothing is persisted; a restart forgets every pending clarification.
//! Last write wins for a key.
//!
//! Expiry is off by default, so a reply days later still matches. A max age
//! can be set; expired entries then read as absent and are dropped on lookup.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::task::TaskCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub chat_id: i64,
    pub user_id: u64,
}

impl PendingKey {
    pub fn new(chat_id: i64, user_id: u64) -> Self {
        Self { chat_id, user_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    /// Task wording shown back to the user and to the follow-up prompt.
    pub task: String,
    pub candidate: TaskCandidate,
    pub created_at: DateTime<Utc>,
}

impl PendingTask {
    pub fn new(candidate: TaskCandidate, created_at: DateTime<Utc>) -> Self {
        Self {
            task: candidate.title().to_string(),
            candidate,
            created_at,
        }
    }

    /// The stored candidate with the supplied deadline merged in.
    pub fn complete(self, deadline: String) -> TaskCandidate {
        self.candidate.with_deadline(deadline)
    }
}

#[derive(Debug, Default)]
pub struct PendingStore {
    entries: Mutex<HashMap<PendingKey, PendingTask>>,
    max_age: Option<Duration>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn expired(&self, task: &PendingTask, now: DateTime<Utc>) -> bool {
        self.max_age
            .is_some_and(|age| now - task.created_at > age)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PendingKey, PendingTask>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &PendingKey, now: DateTime<Utc>) -> Option<PendingTask> {
        let mut entries = self.lock();
        let expired = self.expired(entries.get(key)?, now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).cloned()
    }

    /// Insert or replace.
    pub fn put(&self, key: PendingKey, task: PendingTask) {
        self.lock().insert(key, task);
    }

    pub fn delete(&self, key: &PendingKey) -> Option<PendingTask> {
        self.lock().remove(key)
    }

    /// Remove and return the live entry in one step.
    ///
    /// Two concurrent follow-ups for the same key cannot both receive it.
    pub fn take(&self, key: &PendingKey, now: DateTime<Utc>) -> Option<PendingTask> {
        let task = self.lock().remove(key)?;
        (!self.expired(&task, now)).then_some(task)
    }

    /// Put `task` back unless a newer entry arrived meanwhile.
    pub fn restore(&self, key: PendingKey, task: PendingTask) {
        self.lock().entry(key).or_insert(task);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, 0, 0).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let store = PendingStore::new();
        let key = PendingKey::new(-100, 7);
        store.put(key, PendingTask::new(TaskCandidate::new("Отчёт"), at(9)));
        assert_eq!(store.get(&key, at(10)).unwrap().task, "Отчёт");
        assert!(store.get(&PendingKey::new(-100, 8), at(10)).is_none());
        assert!(store.delete(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let store = PendingStore::new();
        let key = PendingKey::new(1, 1);
        store.put(key, PendingTask::new(TaskCandidate::new("A"), at(9)));
        store.put(key, PendingTask::new(TaskCandidate::new("B"), at(9)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&key, at(9)).unwrap().task, "B");
        assert!(store.take(&key, at(9)).is_none());
    }

    #[test]
    fn no_expiry_by_default() {
        let store = PendingStore::new();
        let key = PendingKey::new(1, 1);
        store.put(key, PendingTask::new(TaskCandidate::new("A"), at(0)));
        let days_later = at(0) + Duration::days(5);
        assert!(store.get(&key, days_later).is_some());
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let store = PendingStore::new().with_max_age(Some(Duration::hours(2)));
        let key = PendingKey::new(1, 1);
        store.put(key, PendingTask::new(TaskCandidate::new("A"), at(9)));
        assert!(store.get(&key, at(10)).is_some());
        assert!(store.get(&key, at(12)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn restore_does_not_clobber_newer_entry() {
        let store = PendingStore::new();
        let key = PendingKey::new(1, 1);
        store.put(key, PendingTask::new(TaskCandidate::new("old"), at(9)));
        let old = store.take(&key, at(9)).unwrap();
        store.put(key, PendingTask::new(TaskCandidate::new("new"), at(9)));
        store.restore(key, old);
        assert_eq!(store.get(&key, at(9)).unwrap().task, "new");
    }

    #[test]
    fn complete_merges_deadline() {
        let candidate = TaskCandidate {
            responsible: Some("Иван".into()),
            ..TaskCandidate::new("Отчёт")
        };
        let t = PendingTask::new(candidate, at(9));
        let c = t.complete("20.10.2026".to_string());
        assert_eq!(c.deadline.as_deref(), Some("20.10.2026"));
        assert_eq!(c.responsible.as_deref(), Some("Иван"));
    }
}
