//! Configuration loading.
//!
//! The connector reads a single TOML file (`config.toml`) with a
//! `[connector]` table using the kebab-case option names of the Rocket.Chat
//! connector, and an optional `[logging]` table.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

/// Default connector display name.
pub const DEFAULT_NAME: &str = "rocket.chat";

/// Default room used when an outbound message carries no target.
pub const DEFAULT_TARGET: &str = "general";

/// Default REST API root.
pub const DEFAULT_API_ROOT: &str = "https://open.rocket.chat/api/v1";

/// Default poll interval in seconds.
pub const DEFAULT_UPDATE_INTERVAL_SECS: f64 = 1.0;

/// Default number of history records requested per poll.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rocket.Chat connector settings.
    pub connector: ConnectorConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Options recognized by the Rocket.Chat connector.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectorConfig {
    /// Connector display name, stamped on every normalized event.
    pub name: String,
    /// Personal access token (`X-Auth-Token`). Required.
    pub token: Option<String>,
    /// User id owning the token (`X-User-Id`). Required.
    pub user_id: Option<String>,
    /// Public channel polled for messages and used for untargeted replies.
    pub default_target: String,
    /// Private group to poll instead of `default_target`.
    pub group: Option<String>,
    /// Seconds between history polls. Fractions allowed.
    pub update_interval: f64,
    /// REST API root, e.g. `https://chat.example.org/api/v1`.
    pub api_root: String,
    /// Alias shown as the sender name on outbound messages.
    pub bot_name: Option<String>,
    /// Maximum records requested per history call.
    pub page_size: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            token: None,
            user_id: None,
            default_target: DEFAULT_TARGET.to_owned(),
            group: None,
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
            api_root: DEFAULT_API_ROOT.to_owned(),
            bot_name: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("name", &self.name)
            .field("token", &self.token.as_ref().map(|_| "__REDACTED__"))
            .field("user_id", &self.user_id)
            .field("default_target", &self.default_target)
            .field("group", &self.group)
            .field("update_interval", &self.update_interval)
            .field("api_root", &self.api_root)
            .field("bot_name", &self.bot_name)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl ConnectorConfig {
    /// Poll interval as a [`Duration`].
    ///
    /// Zero, negative, NaN or absurdly large values fall back to the default.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.update_interval)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| {
                warn!(
                    update_interval = self.update_interval,
                    "invalid update-interval, using default"
                );
                Duration::from_secs_f64(DEFAULT_UPDATE_INTERVAL_SECS)
            })
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON logs. Console only when absent.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

impl Config {
    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid TOML for this schema.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROCKETCHAT_TOKEN") {
            self.connector.token = Some(v);
        }
        if let Some(v) = env("ROCKETCHAT_USER_ID") {
            self.connector.user_id = Some(v);
        }
        if let Some(v) = env("ROCKETCHAT_API_ROOT") {
            self.connector.api_root = v;
        }
        if let Some(v) = env("ROCKETCHAT_DEFAULT_TARGET") {
            self.connector.default_target = v;
        }
        if let Some(v) = env("ROCKETCHAT_UPDATE_INTERVAL") {
            match v.parse() {
                Ok(secs) => self.connector.update_interval = secs,
                Err(_) => warn!(
                    var = "ROCKETCHAT_UPDATE_INTERVAL",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("ROCKETCHAT_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}

/// Load config from `path`, then apply process env overrides.
///
/// A missing file is not an error: defaults are used so a deployment can run
/// purely from environment variables.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            info!(path = %path.display(), "loading config from file");
            Config::from_toml(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.rocketchat-connector/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".rocketchat-connector"))
}

/// Resolve the config file path using a custom env resolver.
///
/// `ROCKETCHAT_CONFIG_PATH` wins; otherwise `config.toml` in [`config_dir`].
///
/// # Errors
///
/// Returns an error if no override is set and the home directory is unknown.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env("ROCKETCHAT_CONFIG_PATH") {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
