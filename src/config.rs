//! Configuration loading and management.
//!
//! Read once at startup from YAML; immutable afterwards.
//!
//! Resolution order:
//! 1. Explicit path (`--config`)
//! 2. `TASKROW_CONFIG_PATH`
//! 3. `./taskrow.yaml`
//! 4. `~/.taskrow/config.yaml`
//! 5. Built-in defaults
//!
//! Environment overrides applied on top: `TASKROW_DB_PATH`,
//! `TASKROW_NUM_WORKERS`, `TASKROW_LOG_LEVEL`.

use crate::logging::LogLevel;
use crate::types::NewRecurringTask;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "TASKROW_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "taskrow.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Recurring definitions registered at startup (keyed by name).
    #[serde(default)]
    pub recurring_tasks: Vec<NewRecurringTask>,
}

/// Store location and log verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: LogLevel::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("taskrow.db")
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Seconds between dispatch passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_num_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between recurring-task evaluations.
    #[serde(default = "default_scheduler_interval")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scheduler_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_scheduler_interval() -> u64 {
    60
}

/// Timeout reaper settings. Disabled unless asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reaper_interval(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_reaper_interval() -> u64 {
    30
}

/// HTTP submission surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            port: default_http_port(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Locate and load the configuration, then apply environment overrides.
    ///
    /// An explicitly named file (argument or env var) must exist; the
    /// implicit locations are optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::discover()
                .map(Self::load)
                .transpose()?
                .unwrap_or_default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// First implicit config file that exists.
    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::home_dir()
            .map(|home| home.join(".taskrow").join("config.yaml"))
            .filter(|p| p.is_file())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var("TASKROW_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Ok(workers) = std::env::var("TASKROW_NUM_WORKERS") {
            self.queue.num_workers = workers
                .parse()
                .with_context(|| format!("TASKROW_NUM_WORKERS is not a number: {workers}"))?;
        }

        if let Ok(level) = std::env::var("TASKROW_LOG_LEVEL") {
            self.server.log_level = level.parse().map_err(anyhow::Error::msg)?;
        }

        Ok(())
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.queue.num_workers == 0 {
            bail!("queue.num_workers must be at least 1");
        }
        if self.queue.poll_interval_secs == 0 {
            bail!("queue.poll_interval_secs must be at least 1");
        }
        if self.scheduler.interval_secs == 0 {
            bail!("scheduler.interval_secs must be at least 1");
        }
        if self.reaper.enabled && self.reaper.interval_secs == 0 {
            bail!("reaper.interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = Config::default();
        assert_eq!(config.queue.num_workers, 4);
        assert_eq!(config.queue.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        assert!(!config.reaper.enabled);
        assert!(config.http.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
queue:
  num_workers: 2
recurring_tasks:
  - name: example
    task_type: log
    cron_spec: "* * * * *"
    max_retries: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.queue.num_workers, 2);
        assert_eq!(config.queue.poll_interval_secs, 5);
        assert_eq!(config.server.db_path, PathBuf::from("taskrow.db"));
        assert_eq!(config.recurring_tasks.len(), 1);
        assert!(!config.recurring_tasks[0].enable_overrun);
        assert_eq!(config.recurring_tasks[0].timeout, 0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.queue.num_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskrow.yaml");
        std::fs::write(&path, "server:\n  db_path: /tmp/q.db\n  log_level: debug\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.db_path, PathBuf::from("/tmp/q.db"));
        assert_eq!(config.server.log_level, LogLevel::Debug);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/taskrow.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
