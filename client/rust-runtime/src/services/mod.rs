use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::storage::{FileStore, FsAsyncStore, KeyValueStore};

use attempt_store::AttemptStore;
use audio_queue::{AudioPlayer, AudioQueue};
use content_cache::ContentCache;
use content_service::ContentService;
use remote::HttpRemote;
use session_service::{SessionDeps, SessionService};
use sync_queue::SyncQueue;

/// Device-wide handles, built once and passed to whatever hosts sessions.
pub struct AppState {
    pub config: Config,
    pub sync_queue: Arc<SyncQueue>,
    pub attempts: Arc<AttemptStore>,
    pub content: Arc<ContentService>,
    pub audio: Arc<AudioQueue>,
    pub remote: Arc<HttpRemote>,
}

impl AppState {
    /// Opens both storage namespaces under `config.data_dir`. Must run inside
    /// a Tokio runtime (the audio queue spawns its driver).
    pub async fn new(config: Config, player: Arc<dyn AudioPlayer>) -> Result<Self> {
        let state_store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::open(config.state_dir()).context("Failed to open state store")?,
        );
        let content_store = Arc::new(
            FsAsyncStore::open(config.content_dir())
                .await
                .context("Failed to open content store")?,
        );

        let remote = Arc::new(HttpRemote::new(
            config.remote_base_url.clone(),
            config.remote_timeout(),
        )?);

        let cache = ContentCache::open(content_store, config.content_schema_version).await;
        let content = Arc::new(ContentService::new(cache, remote.clone()));
        let sync_queue = Arc::new(SyncQueue::new(state_store.clone()));
        let attempts = Arc::new(AttemptStore::new(state_store));
        let audio = Arc::new(AudioQueue::new(player, config.playback_timeout()));

        tracing::info!(
            "Lesson runtime ready (data dir {}, {} items pending sync)",
            config.data_dir.display(),
            sync_queue.len().unwrap_or(0)
        );

        Ok(Self {
            config,
            sync_queue,
            attempts,
            content,
            audio,
            remote,
        })
    }

    pub fn session_service(&self) -> SessionService {
        let deps = SessionDeps {
            content: self.content.clone(),
            attempts: self.attempts.clone(),
            sync_queue: self.sync_queue.clone(),
            sync_sink: self.remote.clone(),
            audio: self.audio.clone(),
            attempt_counter: self.remote.clone(),
        };
        SessionService::new(deps, &self.config)
    }

    /// "Reset my data": clears the outbox, stored attempts and cached content.
    pub async fn reset_local_data(&self) -> Result<()> {
        self.audio.stop_all();
        self.sync_queue.clear()?;
        self.attempts.clear()?;
        self.content.cache().clear().await?;
        Ok(())
    }
}

pub mod attempt_store;
pub mod audio_queue;
pub mod content_cache;
pub mod content_service;
pub mod remote;
pub mod session_engine;
pub mod session_service;
pub mod sync_queue;
pub mod sync_worker;
