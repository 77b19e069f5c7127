use std::time::Duration;
use std::{env, fmt, fs, path};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::status::RetryPolicy;
use crate::monitoring::ProbeSettings;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {0}")]
    ReadFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to write config file {0}")]
    WriteFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid value for {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub probe_timeout_seconds: u64,
    pub probe_attempts: u32,
    pub probe_retry_delay_seconds: u64,
    pub failure_threshold: u32,
    pub reaper_period_seconds: u64,
    /// Expiry given to endpoints created without one; 0 means never
    pub default_expiry_days: u32,
    pub probe_on_create: bool,
    pub max_concurrent_probes: usize,
    pub status_write_attempts: u32,
    pub status_write_backoff_seconds: u64,
    pub history_retention_days: u32,
    pub response_excerpt_bytes: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pingwatch.db".into() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 10,
            probe_attempts: 3,
            probe_retry_delay_seconds: 2,
            failure_threshold: 3,
            reaper_period_seconds: 300,
            default_expiry_days: 30,
            probe_on_create: true,
            max_concurrent_probes: 256,
            status_write_attempts: 3,
            status_write_backoff_seconds: 1,
            history_retention_days: 30,
            response_excerpt_bytes: 512,
        }
    }
}

impl MonitoringConfig {
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_secs(self.probe_timeout_seconds),
            attempts: self.probe_attempts.max(1),
            retry_delay: Duration::from_secs(self.probe_retry_delay_seconds),
            excerpt_bytes: self.response_excerpt_bytes,
        }
    }

    pub fn status_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.status_write_attempts.max(1),
            backoff: Duration::from_secs(self.status_write_backoff_seconds),
        }
    }

    pub fn reaper_period(&self) -> Duration {
        Duration::from_secs(self.reaper_period_seconds.max(1))
    }

    pub fn default_expiry(&self) -> Option<TimeDelta> {
        (self.default_expiry_days > 0).then(|| TimeDelta::days(i64::from(self.default_expiry_days)))
    }

    pub fn history_retention(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.history_retention_days.max(1)))
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pingwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pingwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let m = &self.monitoring;

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_title_1(f, "Monitoring")?;
        write_1(f, "Probe Timeout (s)", &m.probe_timeout_seconds)?;
        write_1(f, "Probe Attempts", &m.probe_attempts)?;
        write_1(f, "Probe Retry Delay (s)", &m.probe_retry_delay_seconds)?;
        write_1(f, "Failure Threshold", &m.failure_threshold)?;
        write_1(f, "Reaper Period (s)", &m.reaper_period_seconds)?;
        write_1(f, "Default Expiry (days)", &m.default_expiry_days)?;
        write_1(f, "Probe On Create", &m.probe_on_create)?;
        write_1(f, "Max Concurrent Probes", &m.max_concurrent_probes)?;
        write_1(f, "Status Write Attempts", &m.status_write_attempts)?;
        write_1(f, "Status Write Backoff (s)", &m.status_write_backoff_seconds)?;
        write_1(f, "History Retention (days)", &m.history_retention_days)?;
        write_1(f, "Response Excerpt (bytes)", &m.response_excerpt_bytes)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pingwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| Error::ReadFailed(config_path.clone(), err))?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))
    }

    /// Apply `PINGWATCH_DATABASE`, `PINGWATCH_BIND` and `PINGWATCH_PORT`
    pub fn apply_env_overrides(&mut self) -> Result<(), Error> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(path) = lookup("PINGWATCH_DATABASE") {
            self.database.path = path;
        }
        if let Some(bind) = lookup("PINGWATCH_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("PINGWATCH_PORT") {
            self.server.port =
                port.parse().map_err(|_| Error::InvalidEnv("PINGWATCH_PORT", port))?;
        }
        Ok(())
    }
}
