use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HourglassError, Result};

pub const API_PREFIX: &str = "/api/v1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;
/// Trigger evaluation is UTC-only.
pub const SUPPORTED_TIMEZONE: &str = "UTC";

/// Top-level config (hourglass.toml + HOURGLASS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourglassConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        match std::path::Path::new(&self.path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Scheduler engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the engine looks for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single execution; exceeding it records a failure.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            execution_timeout_secs: default_execution_timeout_secs(),
            timezone: default_timezone(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}
fn default_timezone() -> String {
    SUPPORTED_TIMEZONE.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hourglass/hourglass.db", home)
}

impl HourglassConfig {
    /// Load config from a TOML file with HOURGLASS_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `HOURGLASS_SCHEDULER__POLL_INTERVAL_MS=500`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("HOURGLASS_").split("__")),
        )
    }

    /// Extract and validate a config from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: HourglassConfig = figment
            .extract()
            .map_err(|e| HourglassError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(HourglassError::Config(
                "scheduler.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.scheduler.execution_timeout_secs == 0 {
            return Err(HourglassError::Config(
                "scheduler.execution_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !self
            .scheduler
            .timezone
            .eq_ignore_ascii_case(SUPPORTED_TIMEZONE)
        {
            return Err(HourglassError::Config(format!(
                "unsupported scheduler.timezone '{}' (only {SUPPORTED_TIMEZONE} is supported)",
                self.scheduler.timezone
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hourglass/hourglass.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<HourglassConfig> {
        HourglassConfig::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.execution_timeout(), Duration::from_secs(300));
        assert!(config.database.path.ends_with("hourglass.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = from_toml(
            r#"
            [server]
            port = 9090

            [database]
            path = "/tmp/jobs.db"

            [scheduler]
            poll_interval_ms = 250
            execution_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.database.path, "/tmp/jobs.db");
        assert_eq!(config.scheduler.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.scheduler.execution_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = from_toml("[scheduler]\npoll_interval_ms = 0").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn database_parent_dir_is_created() {
        let root = std::env::temp_dir().join(format!("hourglass-cfg-{}", std::process::id()));
        let db = DatabaseConfig {
            path: root.join("nested/jobs.db").to_string_lossy().into_owned(),
        };
        db.ensure_parent_dir().unwrap();
        assert!(root.join("nested").is_dir());
        std::fs::remove_dir_all(&root).unwrap();

        let bare = DatabaseConfig {
            path: "jobs.db".to_string(),
        };
        assert!(bare.ensure_parent_dir().is_ok());
    }

    #[test]
    fn unwritable_parent_dir_is_an_io_error() {
        let file = std::env::temp_dir().join(format!("hourglass-file-{}", std::process::id()));
        std::fs::write(&file, b"not a directory").unwrap();
        let db = DatabaseConfig {
            path: file.join("jobs.db").to_string_lossy().into_owned(),
        };
        let err = db.ensure_parent_dir().unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn non_utc_timezone_is_rejected() {
        let err = from_toml("[scheduler]\ntimezone = \"Europe/Paris\"").unwrap_err();
        assert!(err.to_string().contains("Europe/Paris"));
        assert!(from_toml("[scheduler]\ntimezone = \"utc\"").is_ok());
    }
}
