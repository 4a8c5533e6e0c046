//! Runtime configuration for the mocking layer.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. Values can come from YAML/JSON via `from_file` or from
//! `SESSION_MOCK_*` environment variables via `from_env`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Which intercepted requests get logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    /// Don't log any requests
    #[default]
    None,
    /// Only log requests which are mocked
    Mocked,
    /// Only log requests which are not mocked
    Unmocked,
    /// Log all requests whether they match a mock or not
    All,
}

impl DebugLevel {
    pub fn logs_mocked(self) -> bool {
        matches!(self, DebugLevel::Mocked | DebugLevel::All)
    }

    pub fn logs_unmocked(self) -> bool {
        matches!(self, DebugLevel::Unmocked | DebugLevel::All)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" | "off" => Some(DebugLevel::None),
            "mocked" => Some(DebugLevel::Mocked),
            "unmocked" => Some(DebugLevel::Unmocked),
            "all" => Some(DebugLevel::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    /// Delay before the first delivery step when a mock doesn't set one
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,
    /// Gap between consecutive delivery steps (headers, data, completion)
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,
    /// Status code reported for failure responses that don't set their own
    #[serde(default = "default_failure_status_code")]
    pub failure_status_code: u16,
    #[serde(default)]
    pub debug_level: DebugLevel,
}

fn default_delay_ms() -> u64 {
    250
}

fn default_step_interval_ms() -> u64 {
    20
}

fn default_failure_status_code() -> u16 {
    500
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            step_interval_ms: default_step_interval_ms(),
            failure_status_code: default_failure_status_code(),
            debug_level: DebugLevel::default(),
        }
    }
}

impl MockConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    /// Load configuration from a YAML (or JSON) file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mock config {}", path.display()))?;
        let config: MockConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse mock config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `SESSION_MOCK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, "SESSION_MOCK_DEFAULT_DELAY_MS") {
            config.default_delay_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "SESSION_MOCK_STEP_INTERVAL_MS") {
            config.step_interval_ms = ms;
        }
        let status: Option<u16> = parse_var(&lookup, "SESSION_MOCK_FAILURE_STATUS");
        if let Some(status) = status {
            if is_valid_status(status) {
                config.failure_status_code = status;
            } else {
                warn!("Ignoring SESSION_MOCK_FAILURE_STATUS={}: not an HTTP status", status);
            }
        }
        if let Some(raw) = lookup("SESSION_MOCK_DEBUG") {
            match DebugLevel::parse(&raw) {
                Some(level) => config.debug_level = level,
                None => warn!("Ignoring SESSION_MOCK_DEBUG='{}': unknown level", raw),
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !is_valid_status(self.failure_status_code) {
            anyhow::bail!(
                "failureStatusCode must be between 100 and 599, got {}",
                self.failure_status_code
            );
        }
        Ok(())
    }
}

fn is_valid_status(status: u16) -> bool {
    (100..=599).contains(&status)
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}='{}': not a number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MockConfig::default();
        assert_eq!(config.default_delay(), Duration::from_millis(250));
        assert_eq!(config.step_interval(), Duration::from_millis(20));
        assert_eq!(config.failure_status_code, 500);
        assert_eq!(config.debug_level, DebugLevel::None);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "defaultDelayMs: 50\ndebugLevel: mocked\n";
        let config: MockConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_delay_ms, 50);
        assert_eq!(config.step_interval_ms, 20);
        assert_eq!(config.debug_level, DebugLevel::Mocked);
    }

    #[test]
    fn test_from_file_accepts_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"failureStatusCode": 503, "debugLevel": "all"}}"#).unwrap();

        let config = MockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.failure_status_code, 503);
        assert_eq!(config.debug_level, DebugLevel::All);
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let config = MockConfig {
            default_delay_ms: 0,
            step_interval_ms: 5,
            failure_status_code: 502,
            debug_level: DebugLevel::Unmocked,
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["defaultDelayMs"], 0);
        assert_eq!(value["stepIntervalMs"], 5);
        assert_eq!(value["failureStatusCode"], 502);
        assert_eq!(value["debugLevel"], "unmocked");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(MockConfig::from_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_from_file_rejects_bad_status() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "failureStatusCode: 42").unwrap();

        let err = MockConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("failureStatusCode"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = MockConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read mock config"));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("SESSION_MOCK_DEFAULT_DELAY_MS", "0"),
            ("SESSION_MOCK_STEP_INTERVAL_MS", "nope"),
            ("SESSION_MOCK_FAILURE_STATUS", "418"),
            ("SESSION_MOCK_DEBUG", "Unmocked"),
        ]
        .into_iter()
        .collect();

        let config = MockConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.default_delay_ms, 0);
        assert_eq!(config.step_interval_ms, 20);
        assert_eq!(config.failure_status_code, 418);
        assert_eq!(config.debug_level, DebugLevel::Unmocked);
    }

    #[test]
    fn test_debug_level_gates() {
        assert!(DebugLevel::All.logs_mocked() && DebugLevel::All.logs_unmocked());
        assert!(DebugLevel::Mocked.logs_mocked() && !DebugLevel::Mocked.logs_unmocked());
        assert!(!DebugLevel::Unmocked.logs_mocked() && DebugLevel::Unmocked.logs_unmocked());
        assert!(!DebugLevel::None.logs_mocked() && !DebugLevel::None.logs_unmocked());
    }
}
