//! Service configuration: the engine tables plus `[service]` and `[paths]`.
//!
//! ```toml
//! [service]
//! poll_interval_secs = 60
//!
//! [paths]
//! samples = "data/samples.csv"
//! thresholds_file = "thresholds.toml"
//!
//! [thresholds]
//! amplitude_margin = 2
//! ```
//!
//! Every table and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pivotwatch_core::{ConfigError, EngineConfig, SessionHours, SessionQuality, Thresholds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub persist_attempts: u32,
    /// Base delay, doubled after each failed attempt.
    pub persist_backoff_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            fetch_timeout_secs: 10,
            publish_timeout_secs: 5,
            persist_attempts: 3,
            persist_backoff_ms: 250,
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 300,
        }
    }
}

impl ServiceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }

    pub fn breaker_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.breaker_cooldown_secs as i64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("poll_interval_secs", self.poll_interval_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("publish_timeout_secs", self.publish_timeout_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("service.{name} must be greater than zero")));
            }
        }
        if self.persist_attempts == 0 {
            return Err(ConfigError::Invalid("service.persist_attempts must be at least 1".into()));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "service.breaker_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub samples: PathBuf,
    pub state: PathBuf,
    pub signals: PathBuf,
    /// Hot-reloaded thresholds. When unset the `[thresholds]` table is fixed.
    pub thresholds_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            samples: PathBuf::from("data/samples.csv"),
            state: PathBuf::from("data/state.json"),
            signals: PathBuf::from("data/signals.jsonl"),
            thresholds_file: None,
        }
    }
}

impl PathsConfig {
    /// Resolve relative paths against `base`.
    pub fn relative_to(&self, base: &Path) -> Self {
        let join = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
        Self {
            samples: join(&self.samples),
            state: join(&self.state),
            signals: join(&self.signals),
            thresholds_file: self.thresholds_file.as_deref().map(join),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceSettings,
    pub paths: PathsConfig,
    pub thresholds: Thresholds,
    pub sessions: SessionHours,
    pub quality: SessionQuality,
}

impl ServiceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Relative paths in the file resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            config.paths = config.paths.relative_to(dir);
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            thresholds: self.thresholds.clone(),
            sessions: self.sessions.clone(),
            quality: self.quality.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.engine_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.service.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_tables_fill_in() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [service]
            poll_interval_secs = 30

            [paths]
            thresholds_file = "thresholds.toml"

            [thresholds]
            amplitude_margin = 3
            runaway_band = 6

            [quality]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.service.poll_interval_secs, 30);
        assert_eq!(config.service.fetch_timeout_secs, 10);
        assert_eq!(config.paths.thresholds_file, Some(PathBuf::from("thresholds.toml")));
        assert_eq!(config.engine_config().thresholds.amplitude_margin, dec!(3));
        assert!(!config.quality.enabled);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = ServiceConfig::from_toml_str(include_str!("../../config/pivotwatch.toml")).unwrap();
        assert_eq!(config.service, ServiceSettings::default());
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let err = ServiceConfig::from_toml_str("[service]\npoll_interval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn engine_validation_applies() {
        assert!(ServiceConfig::from_toml_str("[thresholds]\namplitude_margin = -1\n").is_err());
    }

    #[test]
    fn load_resolves_paths_beside_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pivotwatch.toml");
        std::fs::write(&path, "[paths]\nstate = \"state.json\"\nsignals = \"/tmp/abs.jsonl\"\n")
            .unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.paths.state, dir.path().join("state.json"));
        assert_eq!(config.paths.signals, PathBuf::from("/tmp/abs.jsonl"));
    }
}
