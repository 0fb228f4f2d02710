//! Controller configuration

use anyhow::{Context, Result};
use appclass_lib::DriverConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "APPCLASS_CONFIG_FILE";

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON file listing the AppClass resources to reconcile
    #[serde(default = "default_resources_path")]
    pub resources_path: PathBuf,

    /// JSON file with workload attribute snapshots per app group
    #[serde(default)]
    pub snapshots_path: Option<PathBuf>,

    /// Full resync interval in seconds
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Deadline for one reconciliation pass in seconds
    #[serde(default = "default_pass_deadline")]
    pub pass_deadline_secs: u64,

    /// First retry delay after a transient failure
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Status write attempts per pass
    #[serde(default = "default_store_write_attempts")]
    pub store_write_attempts: u32,
}

fn default_api_port() -> u16 {
    8080
}

fn default_resources_path() -> PathBuf {
    PathBuf::from("/etc/appclass/resources.json")
}

fn default_resync_interval() -> u64 {
    60
}

fn default_pass_deadline() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_store_write_attempts() -> u32 {
    3
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            resources_path: default_resources_path(),
            snapshots_path: None,
            resync_interval_secs: default_resync_interval(),
            pass_deadline_secs: default_pass_deadline(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            store_write_attempts: default_store_write_attempts(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load with an explicit config file; `APPCLASS_*` variables take precedence
    pub fn load_from(file: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("APPCLASS").try_parsing(true))
            .build()
            .context("Failed to read controller configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid controller configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.pass_deadline_secs == 0 {
            anyhow::bail!("pass_deadline_secs must be positive");
        }
        if self.resync_interval_secs == 0 {
            anyhow::bail!("resync_interval_secs must be positive");
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            anyhow::bail!("initial_backoff_ms exceeds max_backoff_ms");
        }
        Ok(())
    }

    /// Driver settings derived from this configuration
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            pass_deadline: Duration::from_secs(self.pass_deadline_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            store_write_attempts: self.store_write_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_port = 9100\nresources_path = \"/tmp/resources.json\"\npass_deadline_secs = 5"
        )
        .unwrap();

        let config = ControllerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.resources_path, PathBuf::from("/tmp/resources.json"));
        assert_eq!(config.pass_deadline_secs, 5);
        assert_eq!(config.resync_interval_secs, 60);
        assert!(config.snapshots_path.is_none());

        let driver = config.driver_config();
        assert_eq!(driver.pass_deadline, Duration::from_secs(5));
        assert_eq!(driver.initial_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "initial_backoff_ms = 5000\nmax_backoff_ms = 100").unwrap();

        assert!(ControllerConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_default_matches_driver_default() {
        let driver = ControllerConfig::default().driver_config();
        let expected = DriverConfig::default();
        assert_eq!(driver.resync_interval, expected.resync_interval);
        assert_eq!(driver.pass_deadline, expected.pass_deadline);
        assert_eq!(driver.max_backoff, expected.max_backoff);
        assert_eq!(driver.store_write_attempts, expected.store_write_attempts);
    }
}
