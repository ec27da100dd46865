use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_relay.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{key}` (set {env} or add it to the config file)")]
    Missing { key: &'static str, env: &'static str },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "PBJTIME: relays keyword-matching tweets into a Slack channel", version)]
pub struct Config {
    #[clap(long, env = "SLACK_API_TOKEN", hide_env_values = true, help = "Slack bot token.")]
    pub slack_api_token: Option<String>,

    #[clap(long, env = "CHANNEL", help = "Channel matching tweets are relayed to.")]
    pub channel: Option<String>,

    #[clap(long, env = "HOME_CHANNEL", help = "Channel for the online banner and restart notices. Defaults to --channel.")]
    pub home_channel: Option<String>,

    #[clap(long, env = "BOT_ID", help = "Slack user id of the bot. Taken from the RTM handshake when unset.")]
    pub bot_id: Option<String>,

    #[clap(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true, help = "Twitter API v2 bearer token.")]
    pub twitter_bearer_token: Option<String>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[clap(short = 'l', long = "log", env = "RELAY_LOG_LEVEL", help = "Logging level (critical, error, warning, info, debug, trace).")]
    #[serde(rename = "log")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_KEEP", help = "Number of log files to keep, the current one included.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "RELAY_POLL_INTERVAL_MS", help = "Milliseconds one chat poll may block.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "RELAY_RESTART_DELAY_MS", help = "Milliseconds to wait before restarting after a failure.")]
    pub restart_delay_ms: Option<u64>,

    #[clap(long, env = "RELAY_WORKER_JOIN_TIMEOUT_MS", help = "Milliseconds to wait for a stream worker to stop.")]
    pub worker_join_timeout_ms: Option<u64>,

    #[clap(long, env = "SLACK_API_URL", help = "Slack Web API base URL.")]
    pub slack_api_url: Option<String>,

    #[clap(long, env = "TWITTER_API_URL", help = "Twitter API v2 base URL.")]
    pub twitter_api_url: Option<String>,
}

impl Config {
    fn defaults() -> Config {
        Config {
            log_level: Some("info".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_keep: Some(10),
            poll_interval_ms: Some(1000),
            restart_delay_ms: Some(1000),
            worker_join_timeout_ms: Some(5000),
            slack_api_url: Some("https://slack.com/api/".to_string()),
            twitter_api_url: Some("https://api.twitter.com/2/".to_string()),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            slack_api_token: other.slack_api_token.or(self.slack_api_token),
            channel: other.channel.or(self.channel),
            home_channel: other.home_channel.or(self.home_channel),
            bot_id: other.bot_id.or(self.bot_id),
            twitter_bearer_token: other.twitter_bearer_token.or(self.twitter_bearer_token),
            config_path: other.config_path.or(self.config_path),
            log_level: other.log_level.or(self.log_level),
            log_dir: other.log_dir.or(self.log_dir),
            log_keep: other.log_keep.or(self.log_keep),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            restart_delay_ms: other.restart_delay_ms.or(self.restart_delay_ms),
            worker_join_timeout_ms: other.worker_join_timeout_ms.or(self.worker_join_timeout_ms),
            slack_api_url: other.slack_api_url.or(self.slack_api_url),
            twitter_api_url: other.twitter_api_url.or(self.twitter_api_url),
        }
    }

    /// Checks required values and turns the layered options into settings.
    pub fn resolve(self) -> Result<RelayConfig, ConfigError> {
        let slack_api_token = required(self.slack_api_token, "slack_api_token", "SLACK_API_TOKEN")?;
        let channel = required(self.channel, "channel", "CHANNEL")?;
        let twitter_bearer_token = required(self.twitter_bearer_token, "twitter_bearer_token", "TWITTER_BEARER_TOKEN")?;
        let home_channel = self
            .home_channel
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| channel.clone());
        let bot_id = self.bot_id.filter(|id| !id.trim().is_empty());

        let log_keep = self.log_keep.unwrap_or(10);
        if log_keep == 0 {
            return Err(ConfigError::Invalid {
                key: "log_keep",
                reason: "must keep at least the current log file".to_string(),
            });
        }
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(1000);
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(RelayConfig {
            slack_api_token,
            channel,
            home_channel,
            bot_id,
            twitter_bearer_token,
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_keep,
            poll_interval: Duration::from_millis(poll_interval_ms),
            restart_delay: Duration::from_millis(self.restart_delay_ms.unwrap_or(1000)),
            worker_join_timeout: Duration::from_millis(self.worker_join_timeout_ms.unwrap_or(5000)),
            slack_api_url: self.slack_api_url.unwrap_or_else(|| "https://slack.com/api/".to_string()),
            twitter_api_url: self
                .twitter_api_url
                .unwrap_or_else(|| "https://api.twitter.com/2/".to_string()),
        })
    }
}

fn required(value: Option<String>, key: &'static str, env: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { key, env })
}

/// Fully resolved settings for the relay process.
#[derive(Clone)]
pub struct RelayConfig {
    pub slack_api_token: String,
    pub channel: String,
    pub home_channel: String,
    pub bot_id: Option<String>,
    pub twitter_bearer_token: String,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_keep: usize,
    pub poll_interval: Duration,
    pub restart_delay: Duration,
    pub worker_join_timeout: Duration,
    pub slack_api_url: String,
    pub twitter_api_url: String,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("slack_api_token", &"<redacted>")
            .field("channel", &self.channel)
            .field("home_channel", &self.home_channel)
            .field("bot_id", &self.bot_id)
            .field("twitter_bearer_token", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("log_dir", &self.log_dir)
            .field("log_keep", &self.log_keep)
            .field("poll_interval", &self.poll_interval)
            .field("restart_delay", &self.restart_delay)
            .field("worker_join_timeout", &self.worker_join_timeout)
            .field("slack_api_url", &self.slack_api_url)
            .field("twitter_api_url", &self.twitter_api_url)
            .finish()
    }
}

fn read_config_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file_config = serde_json::from_str::<Config>(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(file_config))
}

/// Layers defaults, the config file, then environment and CLI.
pub fn layer(cli: Config) -> Result<Config, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current = current.merge(file_config);
    }
    Ok(current.merge(cli))
}

pub fn load_config() -> Result<RelayConfig, ConfigError> {
    layer(Config::parse())?.resolve()
}
