//! Engine: one owner for every per-sample decision.
//!
//! The engine is synchronous and clock-free. Callers feed it pivot sets and
//! samples in order and get back the events each input produced. Time only
//! advances through sample timestamps and explicit `advance_clock` calls.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::breakout::{BreakoutCandidate, BreakoutValidator, DiscardReason, ValidatorEvent};
use crate::config::{ConfigError, EngineConfig, Thresholds};
use crate::domain::{PivotSet, PriceSample, SessionKind, SessionOhlc, Signal};
use crate::pivot::{self, PivotError};
use crate::schedule::{self, SessionClose, SessionScheduler};
use crate::snapshot::{Snapshot, SNAPSHOT_VERSION};
use crate::state_machine::{PivotState, PivotStateMachine, Transition};
use crate::tension::{TensionTracker, TensionZone};
use crate::volatility::{VolatilityAlert, VolatilityMonitor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// First pivot set; the state machine now exists.
    Bootstrapped(PivotSet),
    PivotEligible(PivotSet),
    Tension(TensionZone),
    BreakoutPending(BreakoutCandidate),
    BreakoutDiscarded {
        candidate: BreakoutCandidate,
        reason: DiscardReason,
        at: DateTime<Utc>,
    },
    Signal(Signal),
    /// Confirmed breakout that did not produce a signal.
    SignalSuppressed(BreakoutCandidate),
    Volatility(VolatilityAlert),
    Transition(Transition),
    SampleRejected {
        sample: PriceSample,
        last_seen: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Events that change persisted state, level statistics included.
    pub fn is_state_change(&self) -> bool {
        match self {
            EngineEvent::Bootstrapped(_)
            | EngineEvent::PivotEligible(_)
            | EngineEvent::Transition(_)
            | EngineEvent::BreakoutPending(_)
            | EngineEvent::Signal(_)
            | EngineEvent::SignalSuppressed(_) => true,
            EngineEvent::BreakoutDiscarded { reason, .. } => reason.is_failure(),
            EngineEvent::Tension(_)
            | EngineEvent::Volatility(_)
            | EngineEvent::SampleRejected { .. } => false,
        }
    }

    /// Events that make up the observable decision stream.
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            EngineEvent::Signal(_) | EngineEvent::SignalSuppressed(_) | EngineEvent::Transition(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    scheduler: SessionScheduler,
    tension: TensionTracker,
    validator: BreakoutValidator,
    volatility: VolatilityMonitor,
    machine: Option<PivotStateMachine>,
    last_sample_at: Option<DateTime<Utc>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            scheduler: SessionScheduler::new(config.sessions.clone()),
            config,
            tension: TensionTracker::new(),
            validator: BreakoutValidator::new(),
            volatility: VolatilityMonitor::new(),
            machine: None,
            last_sample_at: None,
        }
    }

    pub fn restore(config: EngineConfig, snapshot: Snapshot) -> Self {
        let mut engine = Self::new(config);
        engine.scheduler =
            SessionScheduler::with_marks(engine.config.sessions.clone(), snapshot.session_marks);
        engine.machine = Some(PivotStateMachine::restore(snapshot.state, snapshot.eligible));
        engine.last_sample_at = snapshot.last_sample_at;
        engine
    }

    /// `None` until the first pivot set has arrived.
    pub fn snapshot(&self, saved_at: DateTime<Utc>) -> Option<Snapshot> {
        let machine = self.machine.as_ref()?;
        Some(Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at,
            state: machine.state().clone(),
            eligible: machine.eligible().cloned().collect(),
            session_marks: self.scheduler.marks().clone(),
            last_sample_at: self.last_sample_at,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.config.thresholds
    }

    /// Swap thresholds for the next sample. In-flight candidates keep theirs.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<bool, ConfigError> {
        if thresholds == self.config.thresholds {
            return Ok(false);
        }
        thresholds.validate()?;
        info!("thresholds updated");
        self.config.thresholds = thresholds;
        Ok(true)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.machine.is_some()
    }

    pub fn state(&self) -> Option<&PivotState> {
        self.machine.as_ref().map(|m| m.state())
    }

    pub fn machine(&self) -> Option<&PivotStateMachine> {
        self.machine.as_ref()
    }

    pub fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.last_sample_at
    }

    pub fn due_sessions(&self, now: DateTime<Utc>) -> Vec<SessionClose> {
        self.scheduler.due(now)
    }

    /// Compute and offer the pivot set for a fired close.
    ///
    /// A too-narrow session is acknowledged and skipped for the day; bad OHLC
    /// leaves the close due so it is retried.
    pub fn apply_session(
        &mut self,
        close: &SessionClose,
        ohlc: &SessionOhlc,
    ) -> Result<Vec<EngineEvent>, PivotError> {
        if let Err(err) = pivot::check_session_quality(close.session, ohlc, &self.config.quality) {
            self.scheduler.acknowledge(close);
            return Err(err);
        }
        let set = pivot::compute(close.session, close.session_date, ohlc, close.fires_at)?;
        self.scheduler.acknowledge(close);
        info!(pivots = %set, "pivot set computed");
        Ok(self.offer_pivot(set, close.fires_at))
    }

    /// Seed from a previous day's classic session.
    pub fn seed_classic(
        &mut self,
        session_date: NaiveDate,
        ohlc: &SessionOhlc,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineEvent>, PivotError> {
        let close = schedule::session_close(SessionKind::Classic, session_date, &self.config.sessions);
        let set = pivot::compute(SessionKind::Classic, session_date, ohlc, close.fires_at)?;
        info!(pivots = %set, "seeded from last trading day");
        Ok(self.offer_pivot(set, now))
    }

    pub fn offer_pivot(&mut self, set: PivotSet, now: DateTime<Utc>) -> Vec<EngineEvent> {
        match self.machine.as_mut() {
            None => {
                info!(session = %set.session, "state machine bootstrapped");
                self.machine = Some(PivotStateMachine::new(set.clone(), now));
                vec![EngineEvent::Bootstrapped(set)]
            }
            Some(machine) => {
                if machine.offer(set.clone()) {
                    vec![EngineEvent::PivotEligible(set)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Apply wall-clock driven changes (the daily budget reset).
    pub fn advance_clock(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        self.machine
            .as_mut()
            .and_then(|m| m.roll_date(now))
            .map(EngineEvent::Transition)
            .into_iter()
            .collect()
    }

    pub fn ingest(&mut self, sample: &PriceSample) -> Vec<EngineEvent> {
        if let Some(last_seen) = self.last_sample_at {
            if sample.timestamp < last_seen {
                warn!(ts = %sample.timestamp, %last_seen, "out-of-order sample discarded");
                return vec![EngineEvent::SampleRejected { sample: *sample, last_seen }];
            }
        }
        self.last_sample_at = Some(sample.timestamp);

        let thresholds = &self.config.thresholds;
        let hours = &self.config.sessions;
        let mut events = Vec::new();

        let alert = self.volatility.record(sample, thresholds);
        let Some(machine) = self.machine.as_mut() else {
            return events;
        };

        events.extend(machine.roll_date(sample.timestamp).map(EngineEvent::Transition));
        if let Some(alert) = alert {
            events.push(EngineEvent::Volatility(alert));
            events.extend(machine.record_volatility(&alert).map(EngineEvent::Transition));
        }

        let pivots = machine.active_pivot().clone();
        if let Some(zone) = self.tension.record(sample, &pivots, thresholds) {
            info!(level = %zone.level, touches = zone.touch_count, "tension zone");
            events.push(EngineEvent::Tension(zone));
        }

        for event in self.validator.advance(sample, &pivots, thresholds, hours) {
            match event {
                ValidatorEvent::Breached(candidate) => {
                    machine.record_attempt(&candidate);
                    events.push(EngineEvent::BreakoutPending(candidate));
                }
                ValidatorEvent::Discarded { candidate, reason, at } => {
                    let transition = machine.record_discard(&candidate, reason, at, thresholds);
                    events.push(EngineEvent::BreakoutDiscarded { candidate, reason, at });
                    events.extend(transition.map(EngineEvent::Transition));
                }
                ValidatorEvent::Confirmed(candidate) => {
                    let outcome = machine.on_confirmed(&candidate, sample.timestamp, thresholds);
                    match outcome.signal {
                        Some(reason) => {
                            let signal = Signal {
                                timestamp: sample.timestamp,
                                direction: candidate.direction,
                                level: candidate.level_crossed,
                                active_pivot_levels: pivots.clone(),
                                breakout_amplitude: candidate.amplitude,
                                velocity_ok: candidate.velocity_ok,
                                reason,
                                crossed_at: candidate.crossed_at,
                                market_session: candidate.market_session,
                                reliability: outcome.stats,
                            };
                            info!(
                                direction = %signal.direction,
                                level = %signal.level,
                                session = %pivots.session,
                                %reason,
                                "signal"
                            );
                            events.push(EngineEvent::Signal(signal));
                        }
                        None => {
                            info!(direction = %candidate.direction, "breakout confirmed but signal suppressed");
                            events.push(EngineEvent::SignalSuppressed(candidate));
                        }
                    }
                    events.extend(outcome.transitions.into_iter().map(EngineEvent::Transition));
                    if outcome.pivot_changed {
                        self.tension.reset();
                    }
                }
            }
        }

        events
    }
}
