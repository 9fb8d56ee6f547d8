//! Configuration types for the harness.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Comprehensive configuration for a harness invocation.
///
/// Each run gets its own copy; nothing here is shared mutable state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    /// Port allocation.
    #[serde(default)]
    pub ports: PortConfig,

    /// Readiness polling.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Process teardown.
    #[serde(default)]
    pub teardown: TeardownConfig,

    /// Run-level limits and policy.
    #[serde(default)]
    pub run: RunConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| HarnessError::ConfigError(format!("failed to read config: {}", e)))?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HarnessError::ConfigError(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| HarnessError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ports.range_start == 0 || self.ports.range_start >= self.ports.range_end {
            return Err(HarnessError::ConfigError(format!(
                "invalid port range {}..{}",
                self.ports.range_start, self.ports.range_end
            )));
        }
        if self.ports.max_probe_attempts == 0 {
            return Err(HarnessError::ConfigError(
                "ports.max_probe_attempts must be at least 1".into(),
            ));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(HarnessError::ConfigError(
                "readiness.poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Port allocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// First port of the candidate range (inclusive, default: 20000).
    pub range_start: u16,

    /// End of the candidate range (exclusive, default: 40000).
    pub range_end: u16,

    /// Candidates probed before giving up (default: 256).
    pub max_probe_attempts: u32,

    /// Directory holding cross-run port lock files.
    /// Defaults to `<tmp>/gatecheck-ports`.
    pub lock_dir: Option<PathBuf>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_start: 20000,
            range_end: 40000,
            max_probe_attempts: 256,
            lock_dir: None,
        }
    }
}

impl PortConfig {
    /// Returns the lock directory, falling back to the system temp dir.
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("gatecheck-ports"))
    }
}

/// Readiness polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Default time a process gets to become ready (default: 10s).
    pub timeout_ms: u64,

    /// Sleep between readiness probes (default: 100ms).
    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 100,
        }
    }
}

impl ReadinessConfig {
    /// Returns the readiness timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Teardown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownConfig {
    /// Time between SIGTERM and SIGKILL (default: 5s).
    pub grace_period_ms: u64,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
        }
    }
}

impl TeardownConfig {
    /// Returns the grace period as a Duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Run-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Global deadline for a whole run (default: none).
    pub timeout_ms: Option<u64>,

    /// Maximum time a primary command may run (default: 60s).
    pub step_timeout_ms: u64,

    /// Output settling time before checking a long-lived command (default: 500ms).
    pub quiescence_ms: u64,

    /// Root directory for run workspaces. Defaults to the system temp dir.
    pub run_root: Option<PathBuf>,

    /// Keep the run directory when the run does not pass (default: false).
    pub keep_failed_runs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            step_timeout_ms: 60_000,
            quiescence_ms: 500,
            run_root: None,
            keep_failed_runs: false,
        }
    }
}

impl RunConfig {
    /// Returns the global run timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Returns the step timeout as a Duration.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Returns the quiescence window as a Duration.
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.ports.range_start, 20000);
        assert_eq!(config.readiness.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.teardown.grace_period(), Duration::from_secs(5));
        assert!(config.run.timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
[readiness]
timeout_ms = 2500
poll_interval_ms = 50

[run]
step_timeout_ms = 1000
quiescence_ms = 10
keep_failed_runs = true
"#,
        )
        .unwrap();

        assert_eq!(config.readiness.timeout(), Duration::from_millis(2500));
        assert_eq!(config.run.step_timeout(), Duration::from_secs(1));
        assert!(config.run.keep_failed_runs);
        assert_eq!(config.ports.max_probe_attempts, 256);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let err = HarnessConfig::from_toml(
            r#"
[ports]
range_start = 5000
range_end = 4000
max_probe_attempts = 4
"#,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::ConfigError(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = TempDir::new().unwrap();
        let config = HarnessConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.teardown.grace_period_ms, 5_000);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("harness.toml");

        let mut config = HarnessConfig::default();
        config.run.timeout_ms = Some(30_000);
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.run.timeout(), Some(Duration::from_secs(30)));
    }
}
