use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use fixstream_transport::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::repair::{DEFAULT_FOLLOW_THRESHOLD, DEFAULT_MIN_ENTRIES_FOR_JUMP, RevealPolicy};

pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:8000/ws";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 15;
/// Floor for the reveal timer; a zero period is not a valid interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_CHARS_PER_TICK: usize = 1;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const SETTINGS_DIRECTORY_NAME: &str = "fixstream";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "FIXSTREAM_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollSettings {
    #[serde(default = "default_follow_threshold")]
    pub follow_threshold: f32,
    #[serde(default = "default_min_entries_for_jump")]
    pub min_entries_for_jump: usize,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            follow_threshold: default_follow_threshold(),
            min_entries_for_jump: default_min_entries_for_jump(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Zero retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSettings {
    pub fn to_policy(&self) -> ReconnectPolicy {
        if !self.enabled {
            return ReconnectPolicy::Never;
        }

        let initial = Duration::from_millis(self.initial_backoff_ms.max(1));
        ReconnectPolicy::Backoff {
            initial,
            max: Duration::from_millis(self.max_backoff_ms).max(initial),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_chars_per_tick")]
    pub chars_per_tick: usize,
    #[serde(default)]
    pub reveal_policy: RevealPolicy,
    #[serde(default)]
    pub scroll: ScrollSettings,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            tick_interval_ms: default_tick_interval_ms(),
            chars_per_tick: default_chars_per_tick(),
            reveal_policy: RevealPolicy::default(),
            scroll: ScrollSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms).max(MIN_TICK_INTERVAL)
    }

    pub fn normalized(mut self) -> Self {
        self.socket_url = if self.socket_url.trim().is_empty() {
            default_socket_url()
        } else {
            self.socket_url.trim().to_string()
        };
        if self.tick_interval_ms == 0 {
            self.tick_interval_ms = default_tick_interval_ms();
        }
        self.chars_per_tick = self.chars_per_tick.max(1);
        if !self.scroll.follow_threshold.is_finite() || self.scroll.follow_threshold < 0.0 {
            self.scroll.follow_threshold = default_follow_threshold();
        }

        self
    }
}

/// Values given on the command line. They sit above every other layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub socket_url: Option<String>,
}

/// `<config dir>/fixstream/settings.json`, or a relative path when the
/// platform has no config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SETTINGS_DIRECTORY_NAME)
        .join(SETTINGS_FILE_NAME)
}

impl Settings {
    /// Resolves the settings used for the whole run.
    ///
    /// Defaults, then the JSON file at `path` if present, then `FIXSTREAM_*`
    /// variables (nested keys split on `__`), then `overrides`. A layer that
    /// fails to parse drops the file and environment layers but keeps the
    /// overrides.
    pub fn resolve(path: &Path, overrides: &SettingsOverrides) -> Self {
        if !path.exists() {
            tracing::info!(path = ?path, "no settings file, using defaults and environment");
        }

        let layered = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<Settings>();

        let settings = match layered {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "invalid settings, using defaults");
                Settings::default()
            }
        };

        settings.with_overrides(overrides).normalized()
    }

    fn with_overrides(mut self, overrides: &SettingsOverrides) -> Self {
        if let Some(url) = &overrides.socket_url {
            self.socket_url = url.clone();
        }
        self
    }
}

fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.to_string()
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_chars_per_tick() -> usize {
    DEFAULT_CHARS_PER_TICK
}

fn default_follow_threshold() -> f32 {
    DEFAULT_FOLLOW_THRESHOLD
}

fn default_min_entries_for_jump() -> usize {
    DEFAULT_MIN_ENTRIES_FOR_JUMP
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
