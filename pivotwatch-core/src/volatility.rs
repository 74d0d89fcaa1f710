//! Volatility monitor: trailing range as a percentage of the mean price.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::domain::PriceSample;

/// Raised once each time volatility climbs above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolatilityAlert {
    pub at: DateTime<Utc>,
    pub range_pct: Decimal,
    pub threshold_pct: Decimal,
}

#[derive(Debug, Default, Clone)]
pub struct VolatilityMonitor {
    window: VecDeque<PriceSample>,
    elevated: bool,
}

impl VolatilityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(max - min) / mean * 100` over the current window, if enough samples.
    pub fn range_pct(&self, min_samples: usize) -> Option<Decimal> {
        if self.window.is_empty() || self.window.len() < min_samples {
            return None;
        }
        let mut max = Decimal::MIN;
        let mut min = Decimal::MAX;
        let mut sum = Decimal::ZERO;
        for s in &self.window {
            max = max.max(s.price);
            min = min.min(s.price);
            sum += s.price;
        }
        let mean = sum / Decimal::from(self.window.len());
        if mean <= Decimal::ZERO {
            return None;
        }
        Some((max - min) / mean * Decimal::ONE_HUNDRED)
    }

    pub fn record(&mut self, sample: &PriceSample, thresholds: &Thresholds) -> Option<VolatilityAlert> {
        let cutoff = sample.timestamp - thresholds.volatility_window();
        while self.window.front().is_some_and(|s| s.timestamp <= cutoff) {
            self.window.pop_front();
        }
        self.window.push_back(*sample);

        let threshold_pct = thresholds.volatility_threshold_pct?;
        let Some(range_pct) = self.range_pct(thresholds.volatility_min_samples) else {
            self.elevated = false;
            return None;
        };

        let above = range_pct > threshold_pct;
        let rising = above && !self.elevated;
        self.elevated = above;
        rising.then_some(VolatilityAlert {
            at: sample.timestamp,
            range_pct: range_pct.round_dp(3),
            threshold_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn sample(minute: i64, price: Decimal) -> PriceSample {
        PriceSample::new(
            Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap() + Duration::minutes(minute),
            price,
        )
    }

    #[test]
    fn quiet_market_raises_nothing() {
        let mut m = VolatilityMonitor::new();
        let t = Thresholds::default();
        for i in 0..30 {
            assert!(m.record(&sample(i, dec!(2000) + Decimal::from(i % 3)), &t).is_none());
        }
    }

    #[test]
    fn wide_swing_alerts_once() {
        let mut m = VolatilityMonitor::new();
        let t = Thresholds::default();
        let mut alerts = 0;
        for i in 0..30 {
            let price = if i % 2 == 0 { dec!(2000) } else { dec!(2030) };
            if m.record(&sample(i, price), &t).is_some() {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }

    #[test]
    fn needs_minimum_samples() {
        let mut m = VolatilityMonitor::new();
        let t = Thresholds::default();
        for i in 0..9 {
            let price = if i % 2 == 0 { dec!(2000) } else { dec!(2100) };
            assert!(m.record(&sample(i, price), &t).is_none());
        }
        assert!(m.record(&sample(9, dec!(2100)), &t).is_some());
    }

    #[test]
    fn disabled_threshold_never_alerts() {
        let mut m = VolatilityMonitor::new();
        let t = Thresholds {
            volatility_threshold_pct: None,
            ..Thresholds::default()
        };
        for i in 0..20 {
            let price = if i % 2 == 0 { dec!(2000) } else { dec!(2100) };
            assert!(m.record(&sample(i, price), &t).is_none());
        }
    }
}
