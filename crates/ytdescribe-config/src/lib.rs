//! mx-youtube-describe-bot Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, followed by the upper-cased config key.
pub const ENV_PREFIX: &str = "MX_YT_DESCRIBE_BOT_";

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required config key '{0}'")]
    Missing(&'static str),
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid environment override {var}: {reason}")]
    EnvOverride { var: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStyle {
    /// Plain `m.notice` into the room.
    Notice,
    /// `m.notice` carrying a rich-reply relation to the triggering event.
    #[default]
    Thread,
}

impl std::str::FromStr for ReplyStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notice" => Ok(Self::Notice),
            "thread" => Ok(Self::Thread),
            other => Err(format!("expected 'notice' or 'thread', got '{}'", other)),
        }
    }
}

/// File shape. Every key is optional here so that environment overrides can
/// supply required values the file leaves out.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "homeserverUrl")]
    homeserver_url: Option<String>,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "syncStateFile")]
    sync_state_file: Option<String>,
    #[serde(rename = "youTubeApiKey")]
    youtube_api_key: Option<String>,
    #[serde(rename = "youTubeApiBaseUrl")]
    youtube_api_base_url: Option<String>,
    #[serde(rename = "replyStyle")]
    reply_style: Option<ReplyStyle>,
    #[serde(rename = "autoJoin")]
    auto_join: Option<bool>,
    #[serde(rename = "syncTimeoutMs")]
    sync_timeout_ms: Option<u64>,
    #[serde(rename = "logLevel")]
    log_level: Option<String>,
    #[serde(rename = "logDir")]
    log_dir: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub homeserver_url: String,
    pub access_token: String,
    pub sync_state_file: PathBuf,
    pub youtube_api_key: String,
    pub youtube_api_base_url: String,
    pub reply_style: ReplyStyle,
    pub auto_join: bool,
    pub sync_timeout_ms: u64,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("homeserver_url", &self.homeserver_url)
            .field("access_token", &redact(&self.access_token))
            .field("sync_state_file", &self.sync_state_file)
            .field("youtube_api_key", &redact(&self.youtube_api_key))
            .field("youtube_api_base_url", &self.youtube_api_base_url)
            .field("reply_style", &self.reply_style)
            .field("auto_join", &self.auto_join)
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "<redacted>".to_string()
    }
}

/// Environment variable name for a config key, e.g. `accessToken` ->
/// `MX_YT_DESCRIBE_BOT_ACCESSTOKEN`.
pub fn env_var_for(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.to_uppercase())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with an injectable environment lookup.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_with_env(&content, env)
    }

    pub fn from_toml_with_env<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: RawConfig = toml::from_str(content)?;
        raw.apply_env_overrides(&env)?;
        let config = raw.resolve()?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("homeserverUrl", &self.homeserver_url)?;
        require_non_empty("accessToken", &self.access_token)?;
        require_non_empty("youTubeApiKey", &self.youtube_api_key)?;
        if self.sync_state_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("syncStateFile"));
        }
        require_http_url("homeserverUrl", &self.homeserver_url)?;
        require_http_url("youTubeApiBaseUrl", &self.youtube_api_base_url)?;
        if self.sync_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "syncTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl RawConfig {
    fn apply_env_overrides<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(&env_var_for(key));

        override_string(&mut self.homeserver_url, lookup("homeserverUrl"));
        override_string(&mut self.access_token, lookup("accessToken"));
        override_string(&mut self.sync_state_file, lookup("syncStateFile"));
        override_string(&mut self.youtube_api_key, lookup("youTubeApiKey"));
        override_string(&mut self.youtube_api_base_url, lookup("youTubeApiBaseUrl"));
        override_string(&mut self.log_level, lookup("logLevel"));
        override_string(&mut self.log_dir, lookup("logDir"));

        if let Some(value) = lookup("replyStyle") {
            let style = value.parse::<ReplyStyle>().map_err(|reason| ConfigError::EnvOverride {
                var: env_var_for("replyStyle"),
                reason,
            })?;
            self.reply_style = Some(style);
        }
        if let Some(value) = lookup("autoJoin") {
            let parsed = value
                .trim()
                .parse::<bool>()
                .map_err(|e| ConfigError::EnvOverride {
                    var: env_var_for("autoJoin"),
                    reason: e.to_string(),
                })?;
            self.auto_join = Some(parsed);
        }
        if let Some(value) = lookup("syncTimeoutMs") {
            let parsed = value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::EnvOverride {
                    var: env_var_for("syncTimeoutMs"),
                    reason: e.to_string(),
                })?;
            self.sync_timeout_ms = Some(parsed);
        }
        Ok(())
    }

    fn resolve(self) -> Result<Config, ConfigError> {
        Ok(Config {
            homeserver_url: self
                .homeserver_url
                .ok_or(ConfigError::Missing("homeserverUrl"))?,
            access_token: self
                .access_token
                .ok_or(ConfigError::Missing("accessToken"))?,
            sync_state_file: self
                .sync_state_file
                .map(PathBuf::from)
                .ok_or(ConfigError::Missing("syncStateFile"))?,
            youtube_api_key: self
                .youtube_api_key
                .ok_or(ConfigError::Missing("youTubeApiKey"))?,
            youtube_api_base_url: self
                .youtube_api_base_url
                .unwrap_or_else(|| DEFAULT_YOUTUBE_API_BASE_URL.to_string()),
            reply_style: self.reply_style.unwrap_or_default(),
            auto_join: self.auto_join.unwrap_or(true),
            sync_timeout_ms: self.sync_timeout_ms.unwrap_or(DEFAULT_SYNC_TIMEOUT_MS),
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_dir: self.log_dir.map(PathBuf::from),
        })
    }
}

fn override_string(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

fn require_non_empty(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(key));
    }
    Ok(())
}

fn require_http_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("expected an http(s) URL, got '{}'", value),
        })
    }
}
