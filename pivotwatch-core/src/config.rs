//! Engine configuration: thresholds, session hours, session quality gates.
//!
//! Every struct is `#[serde(default)]` so a TOML file only needs the keys it
//! wants to override.

use std::path::{Path, PathBuf};

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{MarketSession, SessionKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime-tunable decision thresholds.
///
/// Durations are carried as whole seconds so the file format stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// USD beyond R2/S2 that counts as an amplitude breach.
    pub amplitude_margin: Decimal,
    pub velocity_window_secs: u64,
    pub stabilization_window_secs: u64,
    /// Tolerance on the reversal side of the breached level.
    pub stabilization_band: Decimal,
    /// Tolerance on the continuation side of the breached level.
    pub runaway_band: Decimal,
    /// Largest gap between samples a candidate survives.
    pub max_gap_secs: u64,
    pub touch_epsilon: Decimal,
    pub touch_count_threshold: usize,
    pub touch_window_secs: u64,
    pub max_switches_per_day: u32,
    pub neutral_thrash_threshold: usize,
    pub thrash_window_secs: u64,
    pub erratic_window_secs: u64,
    /// Hourly range as a percentage of the mean price. `None` disables the check.
    pub volatility_threshold_pct: Option<Decimal>,
    pub volatility_window_secs: u64,
    pub volatility_min_samples: usize,
    /// Minimum move of R2, S2 or P for a switch target to count as different.
    pub min_switch_level_shift: Decimal,
    pub reject_nested_range: bool,
    /// Scale stabilization and velocity windows by the trading session.
    pub adaptive_stabilization: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            amplitude_margin: Decimal::TWO,
            velocity_window_secs: 3 * 60,
            stabilization_window_secs: 15 * 60,
            stabilization_band: Decimal::TWO,
            runaway_band: Decimal::new(5, 0),
            max_gap_secs: 5 * 60,
            touch_epsilon: Decimal::ONE,
            touch_count_threshold: 3,
            touch_window_secs: 30 * 60,
            max_switches_per_day: 2,
            neutral_thrash_threshold: 2,
            thrash_window_secs: 2 * 60 * 60,
            erratic_window_secs: 60 * 60,
            volatility_threshold_pct: Some(Decimal::ONE),
            volatility_window_secs: 60 * 60,
            volatility_min_samples: 10,
            min_switch_level_shift: Decimal::new(5, 0),
            reject_nested_range: true,
            adaptive_stabilization: false,
        }
    }
}

/// Upper bound for every `*_window_secs` and `max_gap_secs` field (7 days).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

fn secs(s: u64) -> Duration {
    Duration::seconds(s.min(MAX_WINDOW_SECS) as i64)
}

impl Thresholds {
    pub fn velocity_window(&self) -> Duration {
        secs(self.velocity_window_secs)
    }

    pub fn stabilization_window(&self) -> Duration {
        secs(self.stabilization_window_secs)
    }

    pub fn max_gap(&self) -> Duration {
        secs(self.max_gap_secs)
    }

    pub fn touch_window(&self) -> Duration {
        secs(self.touch_window_secs)
    }

    pub fn thrash_window(&self) -> Duration {
        secs(self.thrash_window_secs)
    }

    pub fn erratic_window(&self) -> Duration {
        secs(self.erratic_window_secs)
    }

    pub fn volatility_window(&self) -> Duration {
        secs(self.volatility_window_secs)
    }

    /// Stabilization window for a breach during `session`.
    ///
    /// Asia is slower (20 min), the US faster (10 min); Europe uses the base
    /// window. Only applies with `adaptive_stabilization`.
    pub fn stabilization_window_in(&self, session: MarketSession) -> Duration {
        if !self.adaptive_stabilization {
            return self.stabilization_window();
        }
        match session {
            MarketSession::Asia => secs(20 * 60),
            MarketSession::Europe => self.stabilization_window(),
            MarketSession::Us => secs(10 * 60),
        }
    }

    /// Velocity window for a breach during `session` (×1.5 Asia, ×0.7 US).
    pub fn velocity_window_in(&self, session: MarketSession) -> Duration {
        if !self.adaptive_stabilization {
            return self.velocity_window();
        }
        match session {
            MarketSession::Asia => secs(self.velocity_window_secs.saturating_mul(3) / 2),
            MarketSession::Europe => self.velocity_window(),
            MarketSession::Us => secs(self.velocity_window_secs.saturating_mul(7) / 10),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("amplitude_margin", self.amplitude_margin),
            ("stabilization_band", self.stabilization_band),
            ("runaway_band", self.runaway_band),
            ("touch_epsilon", self.touch_epsilon),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        let windows = [
            ("velocity_window_secs", self.velocity_window_secs),
            ("stabilization_window_secs", self.stabilization_window_secs),
            ("max_gap_secs", self.max_gap_secs),
            ("touch_window_secs", self.touch_window_secs),
            ("thrash_window_secs", self.thrash_window_secs),
            ("erratic_window_secs", self.erratic_window_secs),
            ("volatility_window_secs", self.volatility_window_secs),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
            if value > MAX_WINDOW_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at most {MAX_WINDOW_SECS}, got {value}"
                )));
            }
        }
        if self.runaway_band < self.amplitude_margin {
            return Err(ConfigError::Invalid(format!(
                "runaway_band {} must be at least amplitude_margin {}",
                self.runaway_band, self.amplitude_margin
            )));
        }
        if self.touch_count_threshold == 0 {
            return Err(ConfigError::Invalid("touch_count_threshold must be at least 1".into()));
        }
        if self.neutral_thrash_threshold == 0 {
            return Err(ConfigError::Invalid(
                "neutral_thrash_threshold must be at least 1".into(),
            ));
        }
        if let Some(pct) = self.volatility_threshold_pct {
            if pct <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "volatility_threshold_pct must be positive, got {pct}"
                )));
            }
        }
        if self.min_switch_level_shift < Decimal::ZERO {
            return Err(ConfigError::Invalid("min_switch_level_shift must not be negative".into()));
        }
        Ok(())
    }
}

/// UTC session boundaries in whole hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionHours {
    pub asia_start_hour: u32,
    pub asia_end_hour: u32,
    pub europe_start_hour: u32,
    pub europe_end_hour: u32,
    /// Hour the classic (full day) session closes.
    pub classic_close_hour: u32,
    /// Minutes after a close before its OHLC is fetched.
    pub settle_offset_mins: u32,
}

impl Default for SessionHours {
    fn default() -> Self {
        Self {
            asia_start_hour: 0,
            asia_end_hour: 4,
            europe_start_hour: 4,
            europe_end_hour: 13,
            classic_close_hour: 23,
            settle_offset_mins: 3,
        }
    }
}

impl SessionHours {
    /// Hour at which `kind` closes.
    pub fn close_hour(&self, kind: SessionKind) -> u32 {
        match kind {
            SessionKind::Classic => self.classic_close_hour,
            SessionKind::Asia => self.asia_end_hour,
            SessionKind::Europe => self.europe_end_hour,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asia_start_hour >= self.asia_end_hour {
            return Err(ConfigError::Invalid("asia_start_hour must precede asia_end_hour".into()));
        }
        if self.europe_start_hour >= self.europe_end_hour {
            return Err(ConfigError::Invalid(
                "europe_start_hour must precede europe_end_hour".into(),
            ));
        }
        for (name, hour) in [
            ("asia_end_hour", self.asia_end_hour),
            ("europe_end_hour", self.europe_end_hour),
            ("classic_close_hour", self.classic_close_hour),
        ] {
            if hour == 0 || hour > 23 {
                return Err(ConfigError::Invalid(format!("{name} must be within 1..=23, got {hour}")));
            }
        }
        if self.settle_offset_mins >= 60 {
            return Err(ConfigError::Invalid("settle_offset_mins must be below 60".into()));
        }
        Ok(())
    }
}

/// Minimum session range (high - low) for a pivot set to be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionQuality {
    pub enabled: bool,
    pub classic_min_range: Decimal,
    pub asia_min_range: Decimal,
    pub europe_min_range: Decimal,
}

impl Default for SessionQuality {
    fn default() -> Self {
        Self {
            enabled: true,
            classic_min_range: Decimal::new(8, 0),
            asia_min_range: Decimal::new(6, 0),
            europe_min_range: Decimal::new(10, 0),
        }
    }
}

impl SessionQuality {
    /// Minimum range for `kind`, or `None` when the gate is off.
    pub fn min_range(&self, kind: SessionKind) -> Option<Decimal> {
        if !self.enabled {
            return None;
        }
        Some(match kind {
            SessionKind::Classic => self.classic_min_range,
            SessionKind::Asia => self.asia_min_range,
            SessionKind::Europe => self.europe_min_range,
        })
    }
}

/// Everything the engine needs to make decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub sessions: SessionHours,
    pub quality: SessionQuality,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.sessions.validate()
    }
}
