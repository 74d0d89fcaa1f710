//! Trading signals emitted on confirmed breakouts.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::levels::{Direction, Level, PivotSet};
use super::session::MarketSession;
use crate::state_machine::LevelStats;

/// Why a signal was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReason {
    /// Amplitude and stabilization criteria were met on the active pivot set.
    BreakoutConfirmed,
    /// The confirmed breakout also ended a neutral period.
    NeutralExit,
}

impl fmt::Display for SignalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalReason::BreakoutConfirmed => f.write_str("breakout confirmed"),
            SignalReason::NeutralExit => f.write_str("breakout confirmed, leaving neutral"),
        }
    }
}

/// A confirmed breakout, as handed to the signal sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Sample time at which the breakout confirmed.
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// R2 or S2.
    pub level: Level,
    /// The pivot set whose level was broken.
    pub active_pivot_levels: PivotSet,
    /// Distance beyond the level at the breach.
    pub breakout_amplitude: Decimal,
    /// Breakout reached R2/S2 from R1/S1 within the velocity window.
    pub velocity_ok: bool,
    pub reason: SignalReason,
    /// When the level was first breached.
    pub crossed_at: DateTime<Utc>,
    /// Trading session of the breach.
    pub market_session: MarketSession,
    /// Track record of the broken level, including this confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<LevelStats>,
}
