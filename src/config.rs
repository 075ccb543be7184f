//! Configuration types for the bot and its guilds.

use crate::model::Snowflake;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides `discord.token`.
pub const TOKEN_ENV_VAR: &str = "GUILDKEEPER_TOKEN";

/// Names handed out when sanitizing a nickname leaves nothing behind.
pub const DEFAULT_FALLBACK_NAMES: &[&str] = &[
    "Albatross", "Alpha", "Anchor", "Banjo", "Bell", "Beta", "Blackbird", "Bulldog", "Canary",
    "Cyclone", "Daisy", "Dart", "Delta", "Diamond", "Emu", "Eclipse", "Flamingo", "Flute",
    "Heron", "Husky", "Iceberg", "Kiwi", "Kite", "Lily", "Macaw", "Manatee", "Maple", "Nautilus",
    "Octopus", "Pelican", "Puffin", "Robin", "Salmon", "Sonar", "Sparrow", "Toucan", "Violet",
    "Vortex", "Walrus", "Zebra",
];

/// Top-level configuration for the bot process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Discord REST access.
    pub discord: DiscordConfig,
    /// Tick loop settings.
    pub scheduler: SchedulerConfig,
    /// Where guild data is persisted.
    pub storage: StorageConfig,
    /// Log filter and optional log file.
    pub logging: LoggingConfig,
    /// Nickname sanitation settings.
    pub nicknames: NicknameConfig,
}

/// Discord REST API configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. Empty means "read from `GUILDKEEPER_TOKEN`".
    pub token: String,
    /// REST base URL including the API version.
    pub api_base_url: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: "https://discord.com/api/v10".to_owned(),
            request_timeout_secs: 15,
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &if self.token.is_empty() { "<unset>" } else { "<redacted>" })
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl DiscordConfig {
    /// Token from the config file, falling back to the environment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReconcileError::Config`] if neither source has a token.
    pub fn resolved_token(&self) -> crate::Result<String> {
        let token = self.token.trim();
        if !token.is_empty() {
            return Ok(token.to_owned());
        }
        match std::env::var(TOKEN_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
            _ => Err(crate::ReconcileError::Config(format!(
                "discord token is empty; set discord.token or {TOKEN_ENV_VAR}"
            ))),
        }
    }
}

/// Tick loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between tick starts in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
        }
    }
}

/// Guild data persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per guild.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for a daily-rotated log file. `None` logs to stderr only.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            file_dir: None,
        }
    }
}

/// Nickname sanitation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NicknameConfig {
    /// Pool of replacement names; an empty pool uses the built-in one.
    pub fallback_names: Vec<String>,
}

impl Default for NicknameConfig {
    fn default() -> Self {
        Self {
            fallback_names: DEFAULT_FALLBACK_NAMES
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        }
    }
}

impl NicknameConfig {
    /// The configured pool, or the built-in pool when the configured one is empty.
    pub fn pool(&self) -> Vec<String> {
        if self.fallback_names.is_empty() {
            Self::default().fallback_names
        } else {
            self.fallback_names.clone()
        }
    }
}

/// Per-guild settings as resolved by the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    /// Language tag for outbound messages.
    pub language: String,
    /// Role every member should carry.
    pub default_role: Option<Snowflake>,
    /// Channel receiving scheduled event notifications.
    pub event_notification_channel: Option<Snowflake>,
    /// Role mentioned in scheduled event notifications.
    pub event_notification_role: Option<Snowflake>,
    /// Start scheduled events automatically at their start time.
    pub autostart_events: bool,
    /// How long before the start to send the early notification. Zero disables it.
    pub event_early_notification_offset_secs: u64,
    /// Strip leading non-alphanumeric characters from display names.
    pub rename_hoisted_users: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            language: "en".to_owned(),
            default_role: None,
            event_notification_channel: None,
            event_notification_role: None,
            autostart_events: false,
            event_early_notification_offset_secs: 0,
            rename_hoisted_users: false,
        }
    }
}

impl GuildSettings {
    /// Early notification offset, `None` when disabled.
    pub fn early_notification_offset(&self) -> Option<chrono::Duration> {
        if self.event_early_notification_offset_secs == 0 {
            return None;
        }
        i64::try_from(self.event_early_notification_offset_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(data) = dirs::data_dir() {
        data.join("guildkeeper").join("guilds")
    } else {
        PathBuf::from("/tmp").join("guildkeeper").join("guilds")
    }
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::ReconcileError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::ReconcileError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/guildkeeper/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("guildkeeper").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("guildkeeper")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/guildkeeper-config/config.toml")
        }
    }

    /// Tick period as a [`std::time::Duration`], never zero.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler.tick_interval_ms.max(1))
    }
}
