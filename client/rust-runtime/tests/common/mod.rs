#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lesson_runtime::{
    config::Config,
    error::{PlaybackError, StoreError, SyncError},
    models::{LessonContent, Level, Question, QueuedSyncItem, QuestionType},
    services::{
        attempt_store::{AttemptStore, ATTEMPT_KEY_PREFIX},
        audio_queue::{AudioPlayer, AudioQueue},
        content_cache::ContentCache,
        content_service::ContentService,
        remote::{AttemptCounter, ContentSource, SyncSink},
        session_service::{SessionDeps, SessionService},
        sync_queue::{SyncQueue, SYNC_QUEUE_KEY},
    },
    storage::{KeyValueStore, MemoryAsyncStore, MemoryStore},
};

pub const STUDENT: &str = "student-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn question(id: &str, answer: &str) -> Question {
    Question {
        id: id.to_string(),
        question_type: QuestionType::MultipleChoice,
        prompt: format!("Which word matches {}?", id),
        options: vec![answer.to_string(), "cat".to_string(), "dog".to_string()],
        correct_answer: answer.to_string(),
        acceptable_answers: Vec::new(),
        audio_url: None,
        image_url: None,
    }
}

pub fn level(id: &str, size: usize) -> Level {
    Level {
        id: id.to_string(),
        title: format!("Level {}", id),
        introduction: None,
        questions: (0..size)
            .map(|i| question(&format!("{}-q{}", id, i), &format!("word{}", i)))
            .collect(),
        rotation_sets: Vec::new(),
    }
}

pub fn lesson(level_sizes: &[usize]) -> LessonContent {
    LessonContent {
        id: "lesson-colors".to_string(),
        title: "Colors".to_string(),
        levels: level_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| level(&format!("l{}", i), *size))
            .collect(),
    }
}

pub struct StubSource(pub LessonContent);

#[async_trait]
impl ContentSource for StubSource {
    async fn fetch_lesson(&self, lesson_id: &str) -> anyhow::Result<LessonContent> {
        if lesson_id == self.0.id {
            Ok(self.0.clone())
        } else {
            Err(anyhow::anyhow!("lesson {} not found", lesson_id))
        }
    }
}

pub struct FixedCounter(pub Option<u32>);

#[async_trait]
impl AttemptCounter for FixedCounter {
    async fn prior_attempts(&self, _student_id: &str, _lesson_id: &str) -> anyhow::Result<u32> {
        self.0.ok_or_else(|| anyhow::anyhow!("offline"))
    }
}

/// Records acknowledged items; rejects everything while `offline` is set.
#[derive(Default)]
pub struct RecordingSink {
    pub items: Mutex<Vec<QueuedSyncItem>>,
    pub offline: AtomicBool,
}

impl RecordingSink {
    pub fn items(&self) -> Vec<QueuedSyncItem> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncSink for RecordingSink {
    async fn send(&self, item: &QueuedSyncItem) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("offline".to_string()));
        }
        self.items.lock().unwrap().push(item.clone());
        Ok(())
    }
}

/// Clips last 50ms; sources starting with `hang` never finish.
#[derive(Default)]
pub struct FakePlayer {
    pub started: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl FakePlayer {
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn play(&self, source: &str) -> Result<(), PlaybackError> {
        self.started.lock().unwrap().push(source.to_string());
        if source.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Memory store whose writes can be made to fail per namespace.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    pub fail_queue_writes: AtomicBool,
    pub fail_attempt_writes: AtomicBool,
    pub fail_removes: AtomicBool,
}

impl FaultyStore {
    fn refuse(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

impl KeyValueStore for FaultyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key == SYNC_QUEUE_KEY {
            Self::refuse(&self.fail_queue_writes)?;
        } else if key.starts_with(ATTEMPT_KEY_PREFIX) {
            Self::refuse(&self.fail_attempt_writes)?;
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        Self::refuse(&self.fail_removes)?;
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys()
    }
}

pub struct TestHarness {
    pub deps: SessionDeps,
    pub config: Config,
    pub sink: Arc<RecordingSink>,
    pub player: Arc<FakePlayer>,
    pub state_store: Arc<FaultyStore>,
}

impl TestHarness {
    /// Seeded service over the shared handles; a second call models an app restart.
    pub fn service(&self) -> SessionService {
        SessionService::new(self.deps.clone(), &self.config).with_rng_seed(7)
    }
}

pub async fn create_harness(
    content: LessonContent,
    prior_attempts: Option<u32>,
    feedback_delay_ms: u64,
) -> TestHarness {
    init_tracing();

    let config = Config {
        feedback_delay_ms,
        ..Config::default()
    };

    let state_store = Arc::new(FaultyStore::default());
    let shared: Arc<dyn KeyValueStore> = state_store.clone();
    let cache = ContentCache::open(Arc::new(MemoryAsyncStore::new()), 1).await;
    let sink = Arc::new(RecordingSink::default());
    let player = Arc::new(FakePlayer::default());

    let deps = SessionDeps {
        content: Arc::new(ContentService::new(cache, Arc::new(StubSource(content)))),
        attempts: Arc::new(AttemptStore::new(shared.clone())),
        sync_queue: Arc::new(SyncQueue::new(shared)),
        sync_sink: sink.clone(),
        audio: Arc::new(AudioQueue::new(player.clone(), config.playback_timeout())),
        attempt_counter: Arc::new(FixedCounter(prior_attempts)),
    };

    TestHarness {
        deps,
        config,
        sink,
        player,
        state_store,
    }
}
