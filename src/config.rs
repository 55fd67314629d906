//! Daemon configuration
//!
//! Loaded from a TOML file, then overlaid with the environment:
//!
//! ```toml
//! [events]
//! poll_interval_secs = 10
//! delivery = "blocking"
//!
//! [upstream]
//! api_endpoint = "https://mail.proton.me/api"
//!
//! [[account]]
//! username = "alice"
//! uid = "session-uid"
//! access_token = "token"
//!
//! [push]
//! url = "https://ntfy.sh"
//! topic = "alice-mail"
//! ```

use std::{
    collections::HashSet,
    fmt::{self, Debug, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde::{Deserialize, Deserializer};

use crate::{error::ConfigError, events::DeliveryMode, internal};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MAILPUSH_CONFIG";

/// Searched in order when `MAILPUSH_CONFIG` is not set
const DEFAULT_LOCATIONS: [&str; 2] = [
    "./mailpush.config.toml",
    "/etc/mailpush/mailpush.config.toml",
];

const fn default_poll_interval() -> u64 {
    10
}

const fn default_channel_capacity() -> usize {
    16
}

const fn default_timeout() -> u64 {
    30
}

fn default_api_endpoint() -> String {
    "https://mail.proton.me/api".to_string()
}

fn default_app_version() -> String {
    "Other".to_string()
}

fn default_push_url() -> String {
    "http://ntfy.sh".to_string()
}

fn default_title() -> String {
    "ProtonMail".to_string()
}

fn deserialize_poll_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;

    if secs == 0 {
        internal!(
            level = WARN,
            "poll_interval_secs cannot be 0, using {}s",
            default_poll_interval()
        );
        return Ok(default_poll_interval());
    }

    Ok(secs)
}

fn discover_in(explicit: Option<String>, candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit.map(PathBuf::from) {
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::Missing(path))
        };
    }

    candidates
        .iter()
        .find(|path| path.exists())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound(candidates.to_vec()))
}

/// Parse a poll interval given as a whole number of seconds
fn parse_poll_interval(value: &str) -> Result<u64, String> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err("interval must be at least one second".to_string()),
        Ok(secs) => Ok(secs),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub push: PushConfig,
}

impl Config {
    /// Find the config file
    ///
    /// `MAILPUSH_CONFIG` wins when set, and must then name an existing file.
    /// Otherwise the first existing file of `./mailpush.config.toml` and
    /// `/etc/mailpush/mailpush.config.toml` is used.
    ///
    /// # Errors
    ///
    /// If no config file can be found
    pub fn discover() -> Result<PathBuf, ConfigError> {
        discover_in(
            std::env::var(CONFIG_ENV).ok(),
            &DEFAULT_LOCATIONS.map(PathBuf::from),
        )
    }

    /// Read and validate the config file at `path`, applying environment
    /// overrides
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, or the result is invalid
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.push.init();
        config.validate()?;

        Ok(config)
    }

    /// Parse a config without touching the environment
    ///
    /// # Errors
    ///
    /// If `content` is not a valid config document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values looked up through `var`, normally `std::env::var`
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.events.apply_env(&var);
        self.push.apply_env(&var);
    }

    /// # Errors
    ///
    /// On duplicate or empty account names, or a zero channel capacity
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "events.channel_capacity must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.username.is_empty() {
                return Err(ConfigError::Invalid(
                    "account.username cannot be empty".to_string(),
                ));
            }

            if !seen.insert(account.username.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "account {} is configured more than once",
                    account.username
                )));
            }
        }

        Ok(())
    }
}

/// Settings for the poll loops
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Seconds between two polls of the same account
    ///
    /// Default: 10
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_poll_interval"
    )]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Capacity of each subscriber channel created by the daemon
    ///
    /// Default: 16
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            delivery: DeliveryMode::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EventsConfig {
    /// Zero is rejected when parsing, a zero set by hand still maps to the
    /// default
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_secs == 0 {
            Duration::from_secs(default_poll_interval())
        } else {
            Duration::from_secs(self.poll_interval_secs)
        }
    }

    /// Apply `POLL_INTERVAL`
    ///
    /// An unparsable value is logged and the current interval kept.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = var("POLL_INTERVAL") else {
            return;
        };

        match parse_poll_interval(&value) {
            Ok(secs) => {
                internal!(level = INFO, "Poll interval set to {secs} seconds");
                self.poll_interval_secs = secs;
            }
            Err(e) => {
                internal!(
                    level = WARN,
                    "Failed to parse POLL_INTERVAL {value:?}: {e}, falling back to {}s interval",
                    self.poll_interval_secs
                );
            }
        }
    }
}

/// Where and how to reach the provider's event API
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Per request timeout (in seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            app_version: default_app_version(),
            timeout_secs: default_timeout(),
        }
    }
}

/// An already authenticated upstream session
#[derive(Clone, Default, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub uid: String,
    pub access_token: String,
}

impl Debug for AccountConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("uid", &self.uid)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// ntfy style push endpoint
#[derive(Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_url")]
    pub url: String,

    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub user: String,

    /// Base64 encoded basic auth password
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: default_push_url(),
            topic: String::new(),
            user: String::new(),
            password: String::new(),
            title: default_title(),
        }
    }
}

impl Debug for PushConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConfig")
            .field("url", &self.url)
            .field("topic", &self.topic)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("title", &self.title)
            .finish()
    }
}

impl PushConfig {
    /// Fill in a default URL and a random topic where none is configured
    pub fn init(&mut self) {
        if self.topic.is_empty() {
            let mut bytes = [0_u8; 12];
            rand::rng().fill_bytes(&mut bytes);
            self.topic = STANDARD.encode(bytes).replace('/', "+");
            internal!(level = INFO, "Generated push topic {}", self.topic);
        }

        if self.url.is_empty() {
            self.url = default_push_url();
        }
    }

    /// Apply `PUSH_URL`/`PUSH_TOPIC` and `PUSH_USER`/`PUSH_PASSWORD`
    ///
    /// Each pair only applies when both halves are set.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|value| !value.is_empty());

        let (Some(url), Some(topic)) = (non_empty("PUSH_URL"), non_empty("PUSH_TOPIC")) else {
            return;
        };

        self.url = url;
        self.topic = topic;
        internal!(level = INFO, "Push endpoint from environment: {}", self.uri());

        if let (Some(user), Some(password)) = (non_empty("PUSH_USER"), non_empty("PUSH_PASSWORD")) {
            self.user = user;
            self.password = STANDARD.encode(password);
            internal!(
                level = INFO,
                "Authentication for push endpoint configured using environment"
            );
        } else {
            internal!(
                level = INFO,
                "PUSH_USER and PUSH_PASSWORD not both set, assuming no authentication is necessary"
            );
        }
    }

    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), self.topic)
    }

    /// Basic auth credentials, when both halves are configured
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.user, &self.password))
        }
    }
}
