use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Static parameters of the executor. Timeouts are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub min_timeout: u64,
    pub default_timeout: u64,
    /// No upper bound when unset.
    pub max_timeout: Option<u64>,
    pub default_path: String,
    pub default_role: String,
    pub shell: String,
    /// Seconds after which `stop` refuses to signal; the pid may belong to
    /// another process by then.
    pub stop_window: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_timeout: 5,
            default_timeout: 10,
            max_timeout: None,
            default_path: "./logs".to_string(),
            default_role: "root".to_string(),
            shell: "sh".to_string(),
            stop_window: 3600,
        }
    }
}

impl ExecutorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn clamp_timeout(&self, timeout: u64) -> u64 {
        let timeout = if timeout < self.min_timeout {
            self.default_timeout
        } else {
            timeout
        };
        match self.max_timeout {
            Some(max) if max > 0 && timeout > max => max,
            _ => timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn short_timeouts_fall_back_to_default() {
        let config = ExecutorConfig::default();
        for timeout in 0..5 {
            assert_eq!(config.clamp_timeout(timeout), 10);
        }
        assert_eq!(config.clamp_timeout(5), 5);
        assert_eq!(config.clamp_timeout(86_400), 86_400);
    }

    #[test]
    fn long_timeouts_clamp_to_max() {
        let config = ExecutorConfig {
            max_timeout: Some(60),
            ..ExecutorConfig::default()
        };
        assert_eq!(config.clamp_timeout(61), 60);
        assert_eq!(config.clamp_timeout(600), 60);
        assert_eq!(config.clamp_timeout(59), 59);
    }

    #[test]
    fn zero_max_means_unbounded() {
        let config = ExecutorConfig {
            max_timeout: Some(0),
            ..ExecutorConfig::default()
        };
        assert_eq!(config.clamp_timeout(1_000), 1_000);
    }

    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_timeout": 1, "default_path": "/tmp/tunnel"}}"#).unwrap();
        let config = ExecutorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.min_timeout, 1);
        assert_eq!(config.default_path, "/tmp/tunnel");
        assert_eq!(config.default_timeout, 10);
        assert_eq!(config.shell, "sh");
    }

    #[test]
    fn rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "min_timeout = 1").unwrap();
        assert!(matches!(
            ExecutorConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
