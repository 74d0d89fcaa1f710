//! Pivot state machine: active set, neutral mode, daily switch budget.
//!
//! The machine owns the only mutable copy of [`PivotState`]. New pivot sets
//! only become eligible; switching happens on a confirmed breakout of the
//! active set, towards the highest-priority eligible set computed after it.
//!
//! Neutral is entered when breakouts are confirmed in both directions inside
//! `erratic_window`, when `neutral_thrash_threshold` stabilizations fail inside
//! `thrash_window`, or when volatility spikes. The next confirmed breakout
//! leaves neutral.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::breakout::{BreakoutCandidate, DiscardReason};
use crate::config::Thresholds;
use crate::domain::{Direction, Level, PivotSet, PivotSetId, SessionKind, SignalReason};
use crate::pivot::{assess_switch, SwitchAssessment};
use crate::volatility::VolatilityAlert;

const HISTORY_LIMIT: usize = 100;
const HISTORY_KEEP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotMode {
    Active(SessionKind),
    Neutral,
}

impl fmt::Display for PivotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotMode::Active(kind) => write!(f, "active_{kind}"),
            PivotMode::Neutral => f.write_str("neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransitionReason {
    BreakoutSwitch { direction: Direction, switches_today: u32 },
    ErraticReversal { direction: Direction },
    StabilizationThrash { failures: usize },
    ExcessiveVolatility { range_pct: Decimal },
    NeutralExit { direction: Direction },
    DailyReset { date: NaiveDate },
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::BreakoutSwitch { direction, switches_today } => {
                write!(f, "{direction} breakout switch ({switches_today} today)")
            }
            TransitionReason::ErraticReversal { direction } => {
                write!(f, "{direction} breakout reversed a recent breakout")
            }
            TransitionReason::StabilizationThrash { failures } => {
                write!(f, "{failures} failed stabilizations")
            }
            TransitionReason::ExcessiveVolatility { range_pct } => {
                write!(f, "hourly range {range_pct}%")
            }
            TransitionReason::NeutralExit { direction } => write!(f, "{direction} breakout confirmed"),
            TransitionReason::DailyReset { date } => write!(f, "daily reset for {date}"),
        }
    }
}

/// A state-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PivotMode,
    pub to: PivotMode,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
    /// Active pivot set after the transition.
    pub active_pivot: PivotSetId,
}

/// Breakout track record of one level of one session kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    /// Breaches recorded against the level.
    pub attempts: u32,
    /// Breaches that confirmed.
    pub validated: u32,
    /// Breaches discarded by a failed stabilization.
    pub invalidated: u32,
    /// `validated / attempts` as a percentage.
    pub score_pct: Decimal,
    pub last_update: Option<DateTime<Utc>>,
}

impl LevelStats {
    fn touch(&mut self, at: DateTime<Utc>) {
        self.score_pct = if self.attempts == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(self.validated) * Decimal::ONE_HUNDRED / Decimal::from(self.attempts))
                .round_dp(1)
        };
        self.last_update = Some(at);
    }

    /// Below `min_attempts` a level gets the benefit of the doubt.
    pub fn is_reliable(&self, min_attempts: u32, min_score: Decimal) -> bool {
        self.attempts < min_attempts || self.score_pct >= min_score
    }
}

pub fn stats_key(session: SessionKind, level: Level) -> String {
    format!("{level}_{session}")
}

/// The persisted process state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotState {
    /// Pivot set breakouts are measured against.
    pub active_pivot: PivotSet,
    /// Signals are suppressed until a confirmed breakout clears this.
    pub is_neutral: bool,
    /// Switches made on `last_switch_date`, capped by `max_switches_per_day`.
    pub switches_today: u32,
    /// UTC date the switch budget belongs to.
    pub last_switch_date: NaiveDate,
    /// Time of the most recent pivot switch.
    pub last_switch_at: Option<DateTime<Utc>>,
    /// Reliability per level, keyed by `stats_key`.
    #[serde(default)]
    pub level_stats: BTreeMap<String, LevelStats>,
    /// Recent transitions, oldest first.
    #[serde(default)]
    pub history: Vec<Transition>,
}

impl PivotState {
    pub fn seeded(active_pivot: PivotSet, now: DateTime<Utc>) -> Self {
        Self {
            active_pivot,
            is_neutral: false,
            switches_today: 0,
            last_switch_date: now.date_naive(),
            last_switch_at: None,
            level_stats: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn mode(&self) -> PivotMode {
        if self.is_neutral {
            PivotMode::Neutral
        } else {
            PivotMode::Active(self.active_pivot.session)
        }
    }
}

/// What the machine decided about a confirmed breakout.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    /// Set when a signal should be emitted.
    pub signal: Option<SignalReason>,
    /// Reliability of the broken level after this confirmation.
    pub stats: Option<LevelStats>,
    pub transitions: Vec<Transition>,
    pub pivot_changed: bool,
}

#[derive(Debug, Clone)]
pub struct PivotStateMachine {
    state: PivotState,
    eligible: BTreeMap<SessionKind, PivotSet>,
    confirms: VecDeque<(DateTime<Utc>, Direction)>,
    failures: VecDeque<DateTime<Utc>>,
}

impl PivotStateMachine {
    pub fn new(initial: PivotSet, now: DateTime<Utc>) -> Self {
        Self::restore(PivotState::seeded(initial, now), Vec::new())
    }

    pub fn restore(state: PivotState, eligible: Vec<PivotSet>) -> Self {
        let mut machine = Self {
            state,
            eligible: BTreeMap::new(),
            confirms: VecDeque::new(),
            failures: VecDeque::new(),
        };
        let active = machine.state.active_pivot.clone();
        machine.offer(active);
        for set in eligible {
            machine.offer(set);
        }
        machine
    }

    pub fn state(&self) -> &PivotState {
        &self.state
    }

    pub fn mode(&self) -> PivotMode {
        self.state.mode()
    }

    pub fn active_pivot(&self) -> &PivotSet {
        &self.state.active_pivot
    }

    pub fn eligible(&self) -> impl Iterator<Item = &PivotSet> {
        self.eligible.values()
    }

    /// Make a newly computed set eligible. Returns false if it is not newer.
    pub fn offer(&mut self, set: PivotSet) -> bool {
        match self.eligible.get(&set.session) {
            Some(existing) if existing.computed_at >= set.computed_at => false,
            _ => {
                debug!(session = %set.session, date = %set.session_date, "pivot set eligible");
                self.eligible.insert(set.session, set);
                true
            }
        }
    }

    /// Reset the switch budget when the UTC date changes.
    pub fn roll_date(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let today = now.date_naive();
        if today <= self.state.last_switch_date {
            return None;
        }
        info!(%today, previous = self.state.switches_today, "daily switch budget reset");
        self.state.switches_today = 0;
        self.state.last_switch_date = today;
        let mode = self.mode();
        Some(self.record(mode, mode, TransitionReason::DailyReset { date: today }, now))
    }

    pub fn record_attempt(&mut self, candidate: &BreakoutCandidate) {
        let stats = self.stats_mut(candidate);
        stats.attempts += 1;
        stats.touch(candidate.crossed_at);
    }

    pub fn record_discard(
        &mut self,
        candidate: &BreakoutCandidate,
        reason: DiscardReason,
        at: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Option<Transition> {
        if !reason.is_failure() {
            return None;
        }
        let stats = self.stats_mut(candidate);
        stats.invalidated += 1;
        stats.touch(at);

        self.failures.push_back(at);
        let cutoff = at - thresholds.thrash_window();
        while self.failures.front().is_some_and(|t| *t < cutoff) {
            self.failures.pop_front();
        }
        let failures = self.failures.len();
        if self.state.is_neutral || failures < thresholds.neutral_thrash_threshold {
            return None;
        }
        self.clear_logs();
        warn!(failures, "stabilization thrash, entering neutral");
        self.enter_neutral(TransitionReason::StabilizationThrash { failures }, at)
    }

    pub fn record_volatility(&mut self, alert: &VolatilityAlert) -> Option<Transition> {
        if self.state.is_neutral {
            return None;
        }
        warn!(range_pct = %alert.range_pct, "excessive volatility, entering neutral");
        self.enter_neutral(
            TransitionReason::ExcessiveVolatility { range_pct: alert.range_pct },
            alert.at,
        )
    }

    pub fn on_confirmed(
        &mut self,
        candidate: &BreakoutCandidate,
        at: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> ConfirmOutcome {
        let mut outcome = ConfirmOutcome {
            signal: None,
            stats: None,
            transitions: Vec::new(),
            pivot_changed: false,
        };
        if candidate.pivot != self.state.active_pivot.id() {
            debug!("confirmation for a pivot set that is no longer active, ignored");
            return outcome;
        }
        outcome.transitions.extend(self.roll_date(at));

        let stats = self.stats_mut(candidate);
        stats.validated += 1;
        stats.touch(at);
        outcome.stats = Some(stats.clone());

        let direction = candidate.direction;

        if self.state.is_neutral {
            self.clear_logs();
            self.confirms.push_back((at, direction));
            self.state.is_neutral = false;
            let to = self.mode();
            info!(%direction, mode = %to, "leaving neutral");
            let reason = TransitionReason::NeutralExit { direction };
            outcome.transitions.push(self.record(PivotMode::Neutral, to, reason, at));
            outcome.signal = Some(SignalReason::NeutralExit);
            return outcome;
        }

        let cutoff = at - thresholds.erratic_window();
        while self.confirms.front().is_some_and(|(t, _)| *t < cutoff) {
            self.confirms.pop_front();
        }
        if self.confirms.iter().any(|(_, d)| *d == direction.opposite()) {
            self.clear_logs();
            warn!(%direction, "breakouts confirmed both ways, entering neutral");
            outcome
                .transitions
                .extend(self.enter_neutral(TransitionReason::ErraticReversal { direction }, at));
            return outcome;
        }
        self.confirms.push_back((at, direction));
        outcome.signal = Some(SignalReason::BreakoutConfirmed);

        let Some(target) = self.select_target(thresholds) else {
            debug!("no newer eligible pivot set to switch to");
            return outcome;
        };
        if self.state.switches_today >= thresholds.max_switches_per_day {
            warn!(
                switches_today = self.state.switches_today,
                target = %target.session,
                "switch budget exhausted, keeping active pivot set"
            );
            return outcome;
        }

        info!(from = %self.state.active_pivot.session, to = %target.session, %direction, "switching pivot set");
        let from = self.mode();
        self.state.active_pivot = target.clone();
        self.state.switches_today += 1;
        self.state.last_switch_at = Some(at);
        self.state.last_switch_date = at.date_naive();
        let reason = TransitionReason::BreakoutSwitch {
            direction,
            switches_today: self.state.switches_today,
        };
        outcome
            .transitions
            .push(self.record(from, PivotMode::Active(target.session), reason, at));
        outcome.pivot_changed = true;
        outcome
    }

    /// Highest-priority eligible set computed after the active one, ties to
    /// the most recent. `None` when that set fails the meaningful-switch
    /// filter; lower-priority sets are never tried in its place.
    pub fn select_target(&self, thresholds: &Thresholds) -> Option<PivotSet> {
        let active = &self.state.active_pivot;
        let target = self
            .eligible
            .values()
            .filter(|set| set.computed_at > active.computed_at)
            .max_by_key(|set| (set.session.priority(), set.computed_at))?;
        let assessment = assess_switch(
            active,
            target,
            thresholds.min_switch_level_shift,
            thresholds.reject_nested_range,
        );
        if let SwitchAssessment::Meaningful { .. } = assessment {
            Some(target.clone())
        } else {
            debug!(session = %target.session, ?assessment, "switch target not meaningful");
            None
        }
    }

    fn stats_mut(&mut self, candidate: &BreakoutCandidate) -> &mut LevelStats {
        self.state
            .level_stats
            .entry(stats_key(candidate.pivot.session, candidate.level_crossed))
            .or_default()
    }

    fn clear_logs(&mut self) {
        self.confirms.clear();
        self.failures.clear();
    }

    fn enter_neutral(&mut self, reason: TransitionReason, at: DateTime<Utc>) -> Option<Transition> {
        if self.state.is_neutral {
            return None;
        }
        let from = self.mode();
        self.state.is_neutral = true;
        Some(self.record(from, PivotMode::Neutral, reason, at))
    }

    fn record(
        &mut self,
        from: PivotMode,
        to: PivotMode,
        reason: TransitionReason,
        at: DateTime<Utc>,
    ) -> Transition {
        let transition = Transition {
            from,
            to,
            reason,
            at,
            active_pivot: self.state.active_pivot.id(),
        };
        self.state.history.push(transition.clone());
        if self.state.history.len() > HISTORY_LIMIT {
            let excess = self.state.history.len() - HISTORY_KEEP;
            self.state.history.drain(..excess);
        }
        transition
    }
}
