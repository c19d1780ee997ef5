use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;
use crate::metrics::{record_cache_hit, record_cache_invalid, record_cache_miss};
use crate::models::LessonContent;
use crate::storage::AsyncKeyValueStore;

const SCHEMA_VERSION_KEY: &str = "meta:schema_version";
const LESSON_KEY_PREFIX: &str = "lesson:";

#[derive(Debug, Serialize, Deserialize)]
struct CachedLesson {
    content: LessonContent,
    cached_at: DateTime<Utc>,
}

/// Lesson content cached on the device. Entries failing the structural check
/// read as misses. A schema version change wipes the whole cache.
pub struct ContentCache {
    store: Arc<dyn AsyncKeyValueStore>,
    schema_version: u32,
}

impl ContentCache {
    pub async fn open(store: Arc<dyn AsyncKeyValueStore>, schema_version: u32) -> Self {
        let cache = Self {
            store,
            schema_version,
        };
        cache.ensure_schema().await;
        cache
    }

    async fn ensure_schema(&self) {
        let stored = match self.store.get(SCHEMA_VERSION_KEY).await {
            Ok(raw) => raw.and_then(|v| v.trim().parse::<u32>().ok()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read content cache schema version");
                None
            }
        };

        if stored == Some(self.schema_version) {
            return;
        }

        tracing::info!(
            "Content cache schema changed ({:?} -> {}), wiping cache",
            stored,
            self.schema_version
        );
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "Failed to wipe content cache");
        }
        if let Err(e) = self
            .store
            .put(SCHEMA_VERSION_KEY, self.schema_version.to_string())
            .await
        {
            tracing::warn!(error = %e, "Failed to record content cache schema version");
        }
    }

    fn key(lesson_id: &str) -> String {
        format!("{}{}", LESSON_KEY_PREFIX, lesson_id)
    }

    /// Cached content for `lesson_id`, or `None` on a miss, read failure or invalid entry.
    pub async fn get(&self, lesson_id: &str) -> Option<LessonContent> {
        self.get_entry(lesson_id).await.map(|(content, _)| content)
    }

    /// Like [`ContentCache::get`], with the time the entry was written.
    pub async fn get_entry(&self, lesson_id: &str) -> Option<(LessonContent, DateTime<Utc>)> {
        let raw = match self.store.get(&Self::key(lesson_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_cache_miss();
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Content cache read failed for {}", lesson_id);
                record_cache_miss();
                return None;
            }
        };

        let entry = match serde_json::from_str::<CachedLesson>(&raw) {
            Ok(entry) if entry.content.id == lesson_id => entry,
            Ok(_) => {
                tracing::warn!("Cached entry for {} holds a different lesson", lesson_id);
                self.discard(lesson_id).await;
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cached entry for {} is malformed", lesson_id);
                self.discard(lesson_id).await;
                return None;
            }
        };

        if let Err(e) = entry.content.validate() {
            tracing::warn!(error = %e, "Cached lesson {} failed validation", lesson_id);
            self.discard(lesson_id).await;
            return None;
        }

        record_cache_hit();
        Some((entry.content, entry.cached_at))
    }

    /// Upserts `content`, stamping the current time.
    pub async fn put(&self, lesson_id: &str, content: &LessonContent) -> Result<(), StoreError> {
        let entry = CachedLesson {
            content: content.clone(),
            cached_at: Utc::now(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.store.put(&Self::key(lesson_id), raw).await?;
        tracing::debug!("Cached lesson {}", lesson_id);
        Ok(())
    }

    pub async fn invalidate(&self, lesson_id: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(lesson_id)).await
    }

    /// Drops every cached lesson ("reset my data"); the schema marker is rewritten.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await?;
        self.store
            .put(SCHEMA_VERSION_KEY, self.schema_version.to_string())
            .await
    }

    async fn discard(&self, lesson_id: &str) {
        record_cache_invalid();
        if let Err(e) = self.invalidate(lesson_id).await {
            tracing::warn!(error = %e, "Failed to discard cached lesson {}", lesson_id);
        }
    }
}
