use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_notification_title")]
    pub title: String,
    #[serde(default = "default_notification_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_true")]
    pub notify_on_cycle_error: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            log_file: default_log_file(),
            channel_capacity: default_channel_capacity(),
            notifications: NotificationsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: default_notification_title(),
            duration_secs: default_notification_duration_secs(),
            notify_on_cycle_error: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_display,
                source,
            })?
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_INTERVAL_SECS).contains(&self.probe_interval_secs) {
            return Err(ConfigError::Validation(format!(
                "probe_interval_secs must be between 1 and {MAX_INTERVAL_SECS}"
            )));
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.metrics_interval_secs) {
            return Err(ConfigError::Validation(format!(
                "metrics_interval_secs must be between 1 and {MAX_INTERVAL_SECS}"
            )));
        }
        if self.log_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "log_file must not be empty".to_string(),
            ));
        }
        if self.channel_capacity < 1 {
            return Err(ConfigError::Validation(
                "channel_capacity must be >= 1".to_string(),
            ));
        }

        validate_notifications(&self.notifications)?;
        validate_http(&self.http)?;

        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../hdmiwatch.yaml.example")
    }
}

impl HttpConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        SocketAddr::from_str(self.listen.trim()).map_err(|_| {
            ConfigError::Validation("http.listen must be a valid host:port address".to_string())
        })
    }
}

fn validate_notifications(cfg: &NotificationsConfig) -> Result<(), ConfigError> {
    if cfg.title.trim().is_empty() {
        return Err(ConfigError::Validation(
            "notifications.title must not be empty".to_string(),
        ));
    }
    if cfg.duration_secs < 1 {
        return Err(ConfigError::Validation(
            "notifications.duration_secs must be >= 1".to_string(),
        ));
    }
    if cfg.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "notifications.queue_capacity must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_http(cfg: &HttpConfig) -> Result<(), ConfigError> {
    if cfg.listen.trim().is_empty() {
        return Err(ConfigError::Validation(
            "http.listen is required".to_string(),
        ));
    }
    cfg.listen_addr()?;
    Ok(())
}

const fn default_probe_interval_secs() -> u64 {
    5
}

const fn default_metrics_interval_secs() -> u64 {
    1
}

fn default_log_file() -> String {
    "hdmi_monitor_log.json".to_string()
}

const fn default_channel_capacity() -> usize {
    64
}

const fn default_true() -> bool {
    true
}

fn default_notification_title() -> String {
    "HDMI status".to_string()
}

const fn default_notification_duration_secs() -> u64 {
    5
}

const fn default_queue_capacity() -> usize {
    32
}

fn default_listen() -> String {
    "127.0.0.1:9210".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_example_matches_defaults() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).unwrap();
        assert_eq!(cfg, Config::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "probe_interval_secs: 10\nnotifications:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(cfg.probe_interval(), Duration::from_secs(10));
        assert!(!cfg.notifications.enabled);
        assert_eq!(cfg.notifications.title, "HDMI status");
        assert_eq!(cfg.log_file, "hdmi_monitor_log.json");
        assert!(cfg.http.enabled);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn empty_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdmiwatch.yaml");
        fs::write(&path, "\n").unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), Config::default());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = Config::default();
        cfg.probe_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.probe_interval_secs = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.metrics_interval_secs = MAX_INTERVAL_SECS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.probe_interval_secs = MAX_INTERVAL_SECS;
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.notifications.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.http.listen = "localhost".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdmiwatch.yaml");
        fs::write(&path, "probe_interval_secs: [nope").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
