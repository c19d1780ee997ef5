use std::sync::Arc;

use crate::error::StoreError;
use crate::models::AttemptState;
use crate::storage::{clear_prefix, read_json, write_json, KeyValueStore};

pub const ATTEMPT_KEY_PREFIX: &str = "attempt:";

/// Persists the in-progress attempt for each lesson so a reload can resume it.
/// Shares the synchronous store with the sync queue under its own key prefix.
pub struct AttemptStore {
    store: Arc<dyn KeyValueStore>,
}

impl AttemptStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(lesson_id: &str) -> String {
        format!("{}{}", ATTEMPT_KEY_PREFIX, lesson_id)
    }

    pub fn save(&self, attempt: &AttemptState) -> Result<(), StoreError> {
        write_json(self.store.as_ref(), &Self::key(&attempt.lesson_id), attempt)
    }

    pub fn load(&self, lesson_id: &str) -> Result<Option<AttemptState>, StoreError> {
        read_json(self.store.as_ref(), &Self::key(lesson_id))
    }

    pub fn delete(&self, lesson_id: &str) -> Result<(), StoreError> {
        self.store.remove(&Self::key(lesson_id))
    }

    /// Lesson ids with a stored attempt.
    pub fn lessons(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(ATTEMPT_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = clear_prefix(self.store.as_ref(), ATTEMPT_KEY_PREFIX)?;
        tracing::info!("Cleared {} stored attempts", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    #[test]
    fn save_load_delete_round_trip() {
        let store = AttemptStore::new(Arc::new(MemoryStore::new()));
        let mut attempt = AttemptState::new("a1".into(), "lesson-1".into(), "kid".into(), 1);
        attempt.question_index = 3;

        store.save(&attempt).unwrap();
        assert_eq!(store.load("lesson-1").unwrap(), Some(attempt));
        assert_eq!(store.lessons().unwrap(), vec!["lesson-1"]);

        store.delete("lesson-1").unwrap();
        assert_eq!(store.load("lesson-1").unwrap(), None);
    }

    #[test]
    fn attempt_survives_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let attempt = AttemptState::new("a1".into(), "lesson-1".into(), "kid".into(), 2);
        {
            let store = AttemptStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            store.save(&attempt).unwrap();
        }

        let store = AttemptStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        assert_eq!(store.load("lesson-1").unwrap(), Some(attempt));
    }

    #[test]
    fn clear_keeps_sync_queue() {
        let raw = Arc::new(MemoryStore::new());
        raw.set("sync:queue", "[]").unwrap();
        let store = AttemptStore::new(raw.clone());
        store
            .save(&AttemptState::new("a".into(), "l1".into(), "s".into(), 1))
            .unwrap();
        store
            .save(&AttemptState::new("b".into(), "l2".into(), "s".into(), 1))
            .unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.lessons().unwrap().is_empty());
        assert!(raw.get("sync:queue").unwrap().is_some());
    }
}
