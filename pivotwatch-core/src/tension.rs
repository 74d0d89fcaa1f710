//! Tension tracker: repeated touches of the same level in a trailing window.
//!
//! A touch is an entry into the `±touch_epsilon` band around a tracked level;
//! dwelling inside the band is one touch, not many. Once a level reaches the
//! touch threshold its zone is reported once and stays latched until every
//! touch has aged out of the window.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Thresholds;
use crate::domain::{Level, PivotSet, PivotSetId, PriceSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub price: Decimal,
}

/// A contested level. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionZone {
    pub level: Level,
    pub level_price: Decimal,
    pub first_touch_at: DateTime<Utc>,
    pub touch_count: usize,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
struct LevelTouches {
    touches: VecDeque<TouchEvent>,
    inside: bool,
    latched: bool,
}

#[derive(Debug, Default, Clone)]
pub struct TensionTracker {
    levels: BTreeMap<Level, LevelTouches>,
    pivot: Option<PivotSetId>,
}

impl TensionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.levels.clear();
        self.pivot = None;
    }

    /// Touches of `level` currently inside the window.
    pub fn touch_count(&self, level: Level) -> usize {
        self.levels.get(&level).map_or(0, |l| l.touches.len())
    }

    /// Feed one sample. Returns a zone the first time a level crosses the threshold.
    pub fn record(
        &mut self,
        sample: &PriceSample,
        pivots: &PivotSet,
        thresholds: &Thresholds,
    ) -> Option<TensionZone> {
        if self.pivot != Some(pivots.id()) {
            self.reset();
            self.pivot = Some(pivots.id());
        }

        let cutoff = sample.timestamp - thresholds.touch_window();
        let mut emitted = None;

        for level in Level::TRACKED {
            let level_price = pivots.level(level);
            let entry = self.levels.entry(level).or_default();

            while entry.touches.front().is_some_and(|t| t.timestamp <= cutoff) {
                entry.touches.pop_front();
            }
            if entry.touches.is_empty() {
                entry.latched = false;
            }

            let inside = (sample.price - level_price).abs() <= thresholds.touch_epsilon;
            if inside && !entry.inside {
                entry.touches.push_back(TouchEvent {
                    timestamp: sample.timestamp,
                    level,
                    price: sample.price,
                });
                debug!(%level, price = %sample.price, count = entry.touches.len(), "level touched");
            }
            entry.inside = inside;

            if emitted.is_none()
                && !entry.latched
                && entry.touches.len() >= thresholds.touch_count_threshold
            {
                entry.latched = true;
                if let Some(first) = entry.touches.front() {
                    emitted = Some(TensionZone {
                        level,
                        level_price,
                        first_touch_at: first.timestamp,
                        touch_count: entry.touches.len(),
                        detected_at: sample.timestamp,
                    });
                }
            }
        }

        emitted
    }
}
