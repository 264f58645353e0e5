use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Engine tunables. Built once per engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Overall deadline applied by `probe_with_context`.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub max_concurrency: usize,
    /// Kept for callers that re-run failed probes; the engine itself never retries.
    pub retry_count: u32,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    pub max_response_size: usize,
    pub enable_logging: bool,
    /// Pause held after each exchange before its concurrency slot is released.
    #[serde(with = "duration_ms")]
    pub probe_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_concurrency: 50,
            retry_count: 2,
            read_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
            max_response_size: 8192,
            enable_logging: true,
            probe_delay: Duration::ZERO,
        }
    }
}

impl ProbeConfig {
    /// Load a JSON config file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: ProbeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// `<config_dir>/probescope/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("probescope").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.max_concurrency == 0 {
            return Err(ProbeError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_response_size == 0 {
            return Err(ProbeError::InvalidConfig(
                "max_response_size must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("timeout", self.timeout),
            ("read_timeout", self.read_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ProbeError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrency, 50);
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.max_response_size, 8192);
        assert!(config.enable_logging);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ProbeConfig {
            max_concurrency: 0,
            ..ProbeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProbeError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_read_timeout() {
        let config = ProbeConfig {
            read_timeout: Duration::ZERO,
            ..ProbeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_concurrency": 7, "read_timeout": 1500}}"#).unwrap();

        let config = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(config.max_concurrency, 7);
        assert_eq!(config.read_timeout, Duration::from_millis(1500));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ProbeConfig::load(file.path()).is_err());
    }
}
