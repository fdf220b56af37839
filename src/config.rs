//! Configuration loader and validator for the hub relay bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub database: Database,
    pub hub: Hub,
    pub telegram: Telegram,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Capacity of the hand-off queue between hub callbacks and the dispatcher.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Re-issue hub subscriptions for every stored channel at startup.
    #[serde(default = "default_true")]
    pub resubscribe_on_start: bool,
}

/// Connection pool settings for the row store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

/// Callback endpoint settings for the hub engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hub {
    /// Local address the callback server binds to.
    pub bind: String,
    /// Publicly reachable base URL the hub posts to.
    pub callback_base: String,
    /// Forward a zero-valued entry when a payload fails to decode.
    #[serde(default = "default_true")]
    pub forward_malformed: bool,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default)]
    pub admins: Vec<i64>,
}

fn default_queue_capacity() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Database {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Hub {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid("hub.bind must be a socket address"))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.queue_capacity == 0 {
        return Err(ConfigError::Invalid("app.queue_capacity must be > 0"));
    }

    if cfg.database.url.trim().is_empty() {
        return Err(ConfigError::Invalid("database.url must be non-empty"));
    }
    if cfg.database.max_connections == 0 {
        return Err(ConfigError::Invalid("database.max_connections must be > 0"));
    }
    if cfg.database.min_connections > cfg.database.max_connections {
        return Err(ConfigError::Invalid(
            "database.min_connections must not exceed database.max_connections",
        ));
    }
    if cfg.database.max_lifetime_secs == 0 {
        return Err(ConfigError::Invalid("database.max_lifetime_secs must be > 0"));
    }

    cfg.hub.bind_addr()?;
    let base = cfg.hub.callback_base.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConfigError::Invalid("hub.callback_base must be an http(s) URL"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  queue_capacity: 1
  resubscribe_on_start: true

database:
  url: "sqlite://./data/hubwatch.db"
  max_connections: 8
  min_connections: 2
  idle_timeout_secs: 240
  max_lifetime_secs: 240

hub:
  bind: "0.0.0.0:8080"
  callback_base: "https://hubwatch.example.com"
  forward_malformed: true

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admins:
    - 123456789
"#
}
