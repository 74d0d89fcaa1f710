//! Threshold sources: fixed values, or a TOML file reloaded on change.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{info, warn};

use pivotwatch_core::{ConfigError, Thresholds};

use crate::provider::ThresholdSource;

#[derive(Debug, Clone, Default)]
pub struct StaticThresholds(pub Thresholds);

impl ThresholdSource for StaticThresholds {
    fn current(&self) -> Thresholds {
        self.0.clone()
    }
}

#[derive(Debug)]
struct Cached {
    modified: Option<SystemTime>,
    thresholds: Thresholds,
}

/// Thresholds read from a flat TOML file, re-read whenever its mtime moves.
///
/// A file that fails to read, parse or validate leaves the last good
/// values in force.
#[derive(Debug)]
pub struct FileThresholds {
    path: PathBuf,
    cache: Mutex<Cached>,
}

impl FileThresholds {
    /// `fallback` is served until the file first loads cleanly.
    pub fn new(path: PathBuf, fallback: Thresholds) -> Self {
        Self {
            path,
            cache: Mutex::new(Cached {
                modified: None,
                thresholds: fallback,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Thresholds, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let thresholds: Thresholds = toml::from_str(&content)?;
        thresholds.validate()?;
        Ok(thresholds)
    }
}

impl ThresholdSource for FileThresholds {
    fn current(&self) -> Thresholds {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if modified.is_some() && modified != cache.modified {
            // Remember the mtime either way so a bad file warns once.
            cache.modified = modified;
            match self.read() {
                Ok(thresholds) => {
                    if thresholds != cache.thresholds {
                        info!(path = %self.path.display(), "thresholds reloaded");
                    }
                    cache.thresholds = thresholds;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "keeping previous thresholds");
                }
            }
        }
        cache.thresholds.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn touch_later(path: &Path, content: &str) {
        let before = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        loop {
            std::fs::write(path, content).unwrap();
            let after = std::fs::metadata(path).and_then(|m| m.modified()).ok();
            if after != before {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn missing_file_serves_fallback() {
        let source = FileThresholds::new(PathBuf::from("/nonexistent/t.toml"), Thresholds::default());
        assert_eq!(source.current(), Thresholds::default());
    }

    #[test]
    fn reloads_on_change_and_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.toml");
        std::fs::write(&path, "amplitude_margin = 3\n").unwrap();

        let source = FileThresholds::new(path.clone(), Thresholds::default());
        assert_eq!(source.current().amplitude_margin, dec!(3));
        assert_eq!(source.current().stabilization_window_secs, 900);

        touch_later(&path, "amplitude_margin = \"not a number\"\n");
        assert_eq!(source.current().amplitude_margin, dec!(3));

        touch_later(&path, "amplitude_margin = 4\nvelocity_window_secs = 120\n");
        let t = source.current();
        assert_eq!(t.amplitude_margin, dec!(4));
        assert_eq!(t.velocity_window_secs, 120);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.toml");
        std::fs::write(&path, "stabilization_window_secs = 0\n").unwrap();
        let source = FileThresholds::new(path, Thresholds::default());
        assert_eq!(source.current(), Thresholds::default());
    }
}
