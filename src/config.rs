//! User configuration (`config.toml`)
//!
//! ```toml
//! [apply]
//! jobs = 4
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! backoff_factor = 2.0
//! max_delay_ms = 30000
//!
//! [provider]
//! latency_ms = 0
//! fail_types = ["aws_nat_gateway"]
//! ```

use anyhow::{Context, Result};
use declarative::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The tierform configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub apply: ApplyConfig,
    pub retry: RetrySettings,
    pub provider: ProviderConfig,
}

impl Config {
    /// Load config from `path`; a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.apply.jobs == 0 {
            anyhow::bail!("[apply] jobs must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("[retry] max_attempts must be at least 1");
        }
        if self.retry.backoff_factor < 1.0 {
            anyhow::bail!("[retry] backoff_factor must be >= 1.0");
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Provider calls in flight at once
    pub jobs: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}

/// `[retry]` section, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    /// Engine retry policy
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// `[provider]` section: simulated provider behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Artificial delay per provider call
    pub latency_ms: u64,
    /// Resource types whose create/update calls fail
    pub fail_types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.apply.jobs, 4);
        assert_eq!(config.retry.to_retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[apply]
jobs = 8

[provider]
fail_types = ["aws_nat_gateway"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.apply.jobs, 8);
        assert_eq!(config.provider.fail_types, vec!["aws_nat_gateway"]);
        assert_eq!(config.provider.latency_ms, 0);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[apply]\njobs = 0\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("jobs"));
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[apply\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
