use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub driver: DriverConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes a session may wait in the lobby before giving up.
    pub lobby_wait_minutes: u64,
    /// Seconds the bot may be alone before leaving (0 = leave immediately).
    pub alone_grace_seconds: u64,
    pub poll_interval_ms: u64,
    pub join_timeout_seconds: u64,
    pub capture_stop_timeout_seconds: u64,
    pub leave_timeout_seconds: u64,
    pub monitor_stop_timeout_seconds: u64,
    /// How long finished sessions stay queryable before being evicted.
    pub retention_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Give every session its own null sink.
    pub isolate_sessions: bool,
    pub sink_prefix: String,
    /// Sink used by all sessions when isolation is off.
    pub shared_sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Meeting-client driver executable.
    /// Env vars: MEETREC_SESSION_ID, MEETREC_MEETING_URL,
    /// MEETREC_DISPLAY_NAME, MEETREC_AUDIO_SINK
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Defaults to `<data_dir>/meetrec/recordings`.
    pub recordings_dir: Option<PathBuf>,
    pub endpoint: String,
    pub token: Option<String>,
    pub upload_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: String,
    pub webhook_timeout_seconds: u64,
    /// Shell command to run after a session finishes.
    /// Receives the completion payload as JSON via stdin.
    /// Env vars: MEETREC_SESSION_ID, MEETREC_MEETING_URL,
    /// MEETREC_FILE_LOCATION, MEETREC_STARTED_AT, MEETREC_STOPPED_AT
    pub post_command: String,
    /// Timeout in seconds for the post_command (default: 3600 = 1 hour)
    pub post_command_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3838,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lobby_wait_minutes: 30,
            alone_grace_seconds: 0,
            poll_interval_ms: 1000,
            join_timeout_seconds: 120,
            capture_stop_timeout_seconds: 5,
            leave_timeout_seconds: 10,
            monitor_stop_timeout_seconds: 3,
            retention_minutes: 60,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            isolate_sessions: true,
            sink_prefix: "meetrec_sink".to_string(),
            shared_sink: "meetrec_shared".to_string(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command: "meetrec-driver".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            recordings_dir: None,
            endpoint: String::new(),
            token: None,
            upload_timeout_seconds: 300,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            webhook_timeout_seconds: 30,
            post_command: String::new(),
            post_command_timeout_seconds: 3600,
        }
    }
}

impl SessionConfig {
    pub fn lobby_wait(&self) -> Duration {
        Duration::from_secs(self.lobby_wait_minutes * 60)
    }

    pub fn alone_grace(&self) -> Duration {
        Duration::from_secs(self.alone_grace_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }
}

impl StorageConfig {
    pub fn recordings_dir(&self) -> Result<PathBuf> {
        match &self.recordings_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::recordings_dir(),
        }
    }
}

impl Config {
    /// Load from the default location, creating it with defaults if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&global::config_file()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.storage.backend == StorageBackend::Http && self.storage.endpoint.is_empty() {
            bail!("storage.endpoint is required when storage.backend = \"http\"");
        }
        if self.driver.command.trim().is_empty() {
            bail!("driver.command must not be empty");
        }
        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            bail!("audio.sample_rate and audio.channels must be positive");
        }
        Ok(())
    }
}
