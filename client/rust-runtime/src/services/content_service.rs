use std::sync::Arc;

use super::content_cache::ContentCache;
use super::remote::ContentSource;
use crate::error::ContentError;
use crate::models::LessonContent;

/// Cache-first lesson loading.
pub struct ContentService {
    cache: ContentCache,
    source: Arc<dyn ContentSource>,
}

impl ContentService {
    pub fn new(cache: ContentCache, source: Arc<dyn ContentSource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Serves cached content when valid; otherwise fetches, validates and
    /// caches it. Remote content that fails validation is never cached.
    pub async fn load(&self, lesson_id: &str) -> Result<Arc<LessonContent>, ContentError> {
        if let Some(content) = self.cache.get(lesson_id).await {
            tracing::debug!("Serving lesson {} from cache", lesson_id);
            return Ok(Arc::new(content));
        }

        let content = self
            .source
            .fetch_lesson(lesson_id)
            .await
            .map_err(|e| ContentError::Unavailable {
                lesson_id: lesson_id.to_string(),
                reason: format!("{:#}", e),
            })?;

        // Cache entries are keyed and checked by lesson id.
        if content.id != lesson_id {
            return Err(ContentError::IdMismatch {
                requested: lesson_id.to_string(),
                found: content.id,
            });
        }
        content.validate()?;

        if let Err(e) = self.cache.put(lesson_id, &content).await {
            tracing::warn!(error = %e, "Failed to cache lesson {}", lesson_id);
        }

        Ok(Arc::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::fixtures::lesson;
    use crate::storage::MemoryAsyncStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        content: Option<LessonContent>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ContentSource for StubSource {
        async fn fetch_lesson(&self, _lesson_id: &str) -> anyhow::Result<LessonContent> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.content
                .clone()
                .ok_or_else(|| anyhow::anyhow!("network unreachable"))
        }
    }

    async fn service(content: Option<LessonContent>) -> (ContentService, Arc<StubSource>) {
        let source = Arc::new(StubSource {
            content,
            fetches: AtomicUsize::new(0),
        });
        let cache = ContentCache::open(Arc::new(MemoryAsyncStore::new()), 1).await;
        (ContentService::new(cache, source.clone()), source)
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let content = lesson(&[2]);
        let (service, source) = service(Some(content.clone())).await;

        assert_eq!(*service.load(&content.id).await.unwrap(), content);
        assert_eq!(*service.load(&content.id).await.unwrap(), content);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_remote_content_is_an_integrity_error() {
        let content = lesson(&[]);
        let (service, _) = service(Some(content.clone())).await;

        let err = service.load(&content.id).await.unwrap_err();
        assert!(matches!(err, ContentError::NoLevels { .. }));
        assert!(service.cache().get(&content.id).await.is_none());
    }

    #[tokio::test]
    async fn content_under_another_id_is_rejected_and_not_cached() {
        let mut content = lesson(&[2]);
        content.id = "42".to_string();
        let (service, source) = service(Some(content)).await;

        let err = service.load("lesson-animals").await.unwrap_err();
        assert_eq!(
            err,
            ContentError::IdMismatch {
                requested: "lesson-animals".to_string(),
                found: "42".to_string(),
            }
        );
        assert!(service.cache().get("lesson-animals").await.is_none());
        assert!(service.cache().get("42").await.is_none());

        assert!(service.load("lesson-animals").await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loaded_lesson_is_available_offline() {
        let content = lesson(&[2]);
        let store = Arc::new(MemoryAsyncStore::new());
        let online = ContentService::new(
            ContentCache::open(store.clone(), 1).await,
            Arc::new(StubSource {
                content: Some(content.clone()),
                fetches: AtomicUsize::new(0),
            }),
        );
        online.load(&content.id).await.unwrap();

        let offline = ContentService::new(
            ContentCache::open(store, 1).await,
            Arc::new(StubSource {
                content: None,
                fetches: AtomicUsize::new(0),
            }),
        );
        assert_eq!(*offline.load(&content.id).await.unwrap(), content);
    }

    #[tokio::test]
    async fn unreachable_source_reports_unavailable() {
        let (service, _) = service(None).await;
        let err = service.load("missing").await.unwrap_err();
        assert!(matches!(err, ContentError::Unavailable { .. }));
    }
}
