use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub content_schema_version: u32,
    pub remote_base_url: String,
    pub remote_timeout_ms: u64,
    pub flush_interval_secs: u64,
    /// 0 disables the playback timeout.
    pub playback_timeout_ms: u64,
    pub feedback_delay_ms: u64,
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lesson-data"),
            content_schema_version: 1,
            remote_base_url: "http://localhost:8000".to_string(),
            remote_timeout_ms: 5000,
            flush_interval_secs: 30,
            playback_timeout_ms: 30_000,
            feedback_delay_ms: 1200,
            json_logs: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let data_dir = settings
            .get_string("storage.data_dir")
            .or_else(|_| env::var("LESSON_DATA_DIR"))
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let content_schema_version = settings
            .get_int("content.schema_version")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.content_schema_version);

        let remote_base_url = settings
            .get_string("remote.base_url")
            .or_else(|_| env::var("REMOTE_BASE_URL"))
            .unwrap_or(defaults.remote_base_url);

        let remote_timeout_ms =
            positive_int(&settings, "remote.timeout_ms").unwrap_or(defaults.remote_timeout_ms);

        let flush_interval_secs = positive_int(&settings, "sync.flush_interval_secs")
            .unwrap_or(defaults.flush_interval_secs);

        let playback_timeout_ms = settings
            .get_int("audio.playback_timeout_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(defaults.playback_timeout_ms);

        let feedback_delay_ms = settings
            .get_int("session.feedback_delay_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(defaults.feedback_delay_ms);

        let json_logs = settings
            .get_bool("logging.json")
            .unwrap_or(defaults.json_logs);

        Ok(Config {
            data_dir,
            content_schema_version,
            remote_base_url,
            remote_timeout_ms,
            flush_interval_secs,
            playback_timeout_ms,
            feedback_delay_ms,
            json_logs,
        })
    }

    /// Namespace for sync queue and attempt state.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Namespace for cached lesson content.
    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join("content")
    }

    pub fn playback_timeout(&self) -> Option<Duration> {
        (self.playback_timeout_ms > 0).then(|| Duration::from_millis(self.playback_timeout_ms))
    }

    pub fn feedback_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

fn positive_int(settings: &config::Config, key: &str) -> Option<u64> {
    settings
        .get_int(key)
        .ok()
        .filter(|v| *v > 0)
        .and_then(|v| u64::try_from(v).ok())
}
