//! Breakout validator: amplitude, velocity and stabilization of R2/S2 breaks.
//!
//! One tracker per direction, each walking
//! `Idle -> AmplitudeBreached -> Stabilizing -> Confirmed`. All timing is
//! taken from sample timestamps, never the wall clock, so a replayed log
//! produces the same decisions.
//!
//! The stabilization band is asymmetric around the breached level: it allows
//! `stabilization_band` of pullback toward the pivot and `runaway_band` of
//! continuation. Leaving it on the pullback side is a failed breakout. Leaving
//! it on the continuation side drops the candidate without counting a failure;
//! a new one starts when price settles back inside.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{SessionHours, Thresholds};
use crate::domain::{Direction, Level, MarketSession, PivotSet, PivotSetId, PriceSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorState {
    Idle,
    AmplitudeBreached,
    Stabilizing,
    Confirmed,
}

/// A breach of R2 or S2 that is waiting out its stabilization window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutCandidate {
    /// Up for an R2 breach, down for S2.
    pub direction: Direction,
    /// R2 or S2.
    pub level_crossed: Level,
    /// Price of `level_crossed` in the pivot set at breach time.
    pub level_price: Decimal,
    /// Pivot set the breach was measured against.
    pub pivot: PivotSetId,
    /// Timestamp of the first sample beyond level + margin.
    pub crossed_at: DateTime<Utc>,
    /// Price of that first sample.
    pub breach_price: Decimal,
    /// Distance beyond the level at the breach.
    pub amplitude: Decimal,
    /// When price last crossed R1 (S1 for down) on the way out.
    pub reached_r1_at: Option<DateTime<Utc>>,
    /// R1 to R2 (S1 to S2) took no longer than the velocity window.
    pub velocity_ok: bool,
    /// Trading session the breach happened in.
    pub market_session: MarketSession,
    /// Set once the stabilization window has elapsed inside the band.
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DiscardReason {
    /// Price fell back through the reversal side of the band.
    Retracement,
    /// Price ran beyond the continuation side of the band.
    Runaway,
    /// Gap between samples exceeded `max_gap`.
    StaleData { gap_secs: i64 },
}

impl DiscardReason {
    /// Whether this discard counts as a failed stabilization.
    pub fn is_failure(self) -> bool {
        matches!(self, DiscardReason::Retracement)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidatorEvent {
    Breached(BreakoutCandidate),
    Discarded {
        candidate: BreakoutCandidate,
        reason: DiscardReason,
        at: DateTime<Utc>,
    },
    Confirmed(BreakoutCandidate),
}

/// Parameters frozen when a candidate is created.
#[derive(Debug, Clone, Copy)]
struct CandidateParams {
    margin: Decimal,
    pullback: Decimal,
    runaway: Decimal,
    window: Duration,
    max_gap: Duration,
}

#[derive(Debug, Clone)]
struct DirectionalTracker {
    direction: Direction,
    state: ValidatorState,
    candidate: Option<(BreakoutCandidate, CandidateParams)>,
    inner_cross_at: Option<DateTime<Utc>>,
    beyond_inner: Option<bool>,
}

impl DirectionalTracker {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: ValidatorState::Idle,
            candidate: None,
            inner_cross_at: None,
            beyond_inner: None,
        }
    }

    /// Signed distance of `price` past `level` in this tracker's direction.
    fn excess(&self, price: Decimal, level: Decimal) -> Decimal {
        match self.direction {
            Direction::Up => price - level,
            Direction::Down => level - price,
        }
    }

    fn discard(&mut self, reason: DiscardReason, at: DateTime<Utc>, events: &mut Vec<ValidatorEvent>) {
        if let Some((candidate, _)) = self.candidate.take() {
            debug!(direction = %self.direction, ?reason, "breakout candidate discarded");
            events.push(ValidatorEvent::Discarded { candidate, reason, at });
        }
        self.state = ValidatorState::Idle;
    }

    fn track_inner(&mut self, sample: &PriceSample, pivots: &PivotSet) {
        let inner = pivots.level(self.direction.inner_level());
        let beyond = self.excess(sample.price, inner) >= Decimal::ZERO;
        if !beyond {
            self.inner_cross_at = None;
        } else if self.beyond_inner == Some(false) {
            self.inner_cross_at = Some(sample.timestamp);
        }
        self.beyond_inner = Some(beyond);
    }

    fn advance(
        &mut self,
        sample: &PriceSample,
        prev_ts: Option<DateTime<Utc>>,
        pivots: &PivotSet,
        thresholds: &Thresholds,
        hours: &SessionHours,
        events: &mut Vec<ValidatorEvent>,
    ) {
        self.track_inner(sample, pivots);

        match self.state {
            ValidatorState::AmplitudeBreached | ValidatorState::Stabilizing => {
                self.stabilize(sample, prev_ts, events);
            }
            ValidatorState::Confirmed => {
                let release = self.candidate.as_ref().map_or(true, |(c, p)| {
                    self.excess(sample.price, c.level_price) < p.margin
                });
                if release {
                    self.candidate = None;
                    self.state = ValidatorState::Idle;
                }
            }
            ValidatorState::Idle => {}
        }

        if self.state == ValidatorState::Idle {
            self.try_breach(sample, pivots, thresholds, hours, events);
        }
    }

    fn stabilize(
        &mut self,
        sample: &PriceSample,
        prev_ts: Option<DateTime<Utc>>,
        events: &mut Vec<ValidatorEvent>,
    ) {
        let Some((level_price, crossed_at, params)) = self
            .candidate
            .as_ref()
            .map(|(c, p)| (c.level_price, c.crossed_at, *p))
        else {
            self.state = ValidatorState::Idle;
            return;
        };

        if let Some(prev) = prev_ts {
            let gap = sample.timestamp - prev;
            if gap > params.max_gap {
                let reason = DiscardReason::StaleData { gap_secs: gap.num_seconds() };
                self.discard(reason, sample.timestamp, events);
                return;
            }
        }

        let excess = self.excess(sample.price, level_price);
        if excess < -params.pullback {
            self.discard(DiscardReason::Retracement, sample.timestamp, events);
            return;
        }
        if excess > params.runaway {
            self.discard(DiscardReason::Runaway, sample.timestamp, events);
            return;
        }

        if sample.timestamp - crossed_at >= params.window {
            if let Some((mut confirmed, params)) = self.candidate.take() {
                confirmed.confirmed_at = Some(sample.timestamp);
                info!(
                    direction = %confirmed.direction,
                    level = %confirmed.level_crossed,
                    price = %sample.price,
                    velocity_ok = confirmed.velocity_ok,
                    "breakout confirmed"
                );
                events.push(ValidatorEvent::Confirmed(confirmed.clone()));
                self.candidate = Some((confirmed, params));
                self.state = ValidatorState::Confirmed;
            }
        } else {
            self.state = ValidatorState::Stabilizing;
        }
    }

    fn try_breach(
        &mut self,
        sample: &PriceSample,
        pivots: &PivotSet,
        thresholds: &Thresholds,
        hours: &SessionHours,
        events: &mut Vec<ValidatorEvent>,
    ) {
        let level = self.direction.extreme_level();
        let level_price = pivots.level(level);
        let excess = self.excess(sample.price, level_price);
        if excess < thresholds.amplitude_margin || excess > thresholds.runaway_band {
            return;
        }

        let market_session = MarketSession::at(sample.timestamp, hours);
        let velocity_window = thresholds.velocity_window_in(market_session);
        let velocity_ok = self
            .inner_cross_at
            .is_some_and(|t| sample.timestamp - t <= velocity_window);

        let candidate = BreakoutCandidate {
            direction: self.direction,
            level_crossed: level,
            level_price,
            pivot: pivots.id(),
            crossed_at: sample.timestamp,
            breach_price: sample.price,
            amplitude: excess,
            reached_r1_at: self.inner_cross_at,
            velocity_ok,
            market_session,
            confirmed_at: None,
        };
        let params = CandidateParams {
            margin: thresholds.amplitude_margin,
            pullback: thresholds.stabilization_band,
            runaway: thresholds.runaway_band,
            window: thresholds.stabilization_window_in(market_session),
            max_gap: thresholds.max_gap(),
        };
        debug!(direction = %self.direction, %level, price = %sample.price, "amplitude breached");
        events.push(ValidatorEvent::Breached(candidate.clone()));
        self.candidate = Some((candidate, params));
        self.state = ValidatorState::AmplitudeBreached;
    }
}

/// Up and down trackers bound to the active pivot set.
#[derive(Debug, Clone)]
pub struct BreakoutValidator {
    up: DirectionalTracker,
    down: DirectionalTracker,
    pivot: Option<PivotSetId>,
    last_ts: Option<DateTime<Utc>>,
}

impl Default for BreakoutValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakoutValidator {
    pub fn new() -> Self {
        Self {
            up: DirectionalTracker::new(Direction::Up),
            down: DirectionalTracker::new(Direction::Down),
            pivot: None,
            last_ts: None,
        }
    }

    /// Drop both trackers. The gap clock is kept.
    pub fn reset(&mut self) {
        self.up = DirectionalTracker::new(Direction::Up);
        self.down = DirectionalTracker::new(Direction::Down);
        self.pivot = None;
    }

    pub fn state(&self, direction: Direction) -> ValidatorState {
        match direction {
            Direction::Up => self.up.state,
            Direction::Down => self.down.state,
        }
    }

    pub fn candidate(&self, direction: Direction) -> Option<&BreakoutCandidate> {
        let tracker = match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        };
        tracker.candidate.as_ref().map(|(c, _)| c)
    }

    /// Feed one sample against the active pivot set.
    pub fn advance(
        &mut self,
        sample: &PriceSample,
        pivots: &PivotSet,
        thresholds: &Thresholds,
        hours: &SessionHours,
    ) -> Vec<ValidatorEvent> {
        if self.pivot != Some(pivots.id()) {
            self.reset();
            self.pivot = Some(pivots.id());
        }

        let mut events = Vec::new();
        let prev = self.last_ts;
        self.up.advance(sample, prev, pivots, thresholds, hours, &mut events);
        self.down.advance(sample, prev, pivots, thresholds, hours, &mut events);
        self.last_ts = Some(sample.timestamp);
        events
    }

    /// Feed a run of samples; returns the last candidate confirmed in it.
    pub fn evaluate(
        &mut self,
        segment: &[PriceSample],
        pivots: &PivotSet,
        thresholds: &Thresholds,
        hours: &SessionHours,
    ) -> Option<BreakoutCandidate> {
        let mut confirmed = None;
        for sample in segment {
            for event in self.advance(sample, pivots, thresholds, hours) {
                if let ValidatorEvent::Confirmed(c) = event {
                    confirmed = Some(c);
                }
            }
        }
        confirmed
    }
}
