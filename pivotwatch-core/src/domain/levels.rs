//! Pivot levels and the OHLC they are derived from.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::session::SessionKind;

/// One of the five floor-trader levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Level {
    R2,
    R1,
    P,
    S1,
    S2,
}

impl Level {
    /// Levels watched by the tension tracker, top to bottom.
    pub const TRACKED: [Level; 4] = [Level::R2, Level::R1, Level::S1, Level::S2];
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::R2 => "R2",
            Level::R1 => "R1",
            Level::P => "P",
            Level::S1 => "S1",
            Level::S2 => "S2",
        };
        f.write_str(s)
    }
}

/// Breakout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// R2 for up, S2 for down.
    pub fn extreme_level(self) -> Level {
        match self {
            Direction::Up => Level::R2,
            Direction::Down => Level::S2,
        }
    }

    /// R1 for up, S1 for down. Used for velocity.
    pub fn inner_level(self) -> Level {
        match self {
            Direction::Up => Level::R1,
            Direction::Down => Level::S1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// High, low and close of one finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOhlc {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl SessionOhlc {
    pub fn new(high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self { high, low, close }
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Identity of a pivot set: which session produced it and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PivotSetId {
    pub session: SessionKind,
    pub computed_at: DateTime<Utc>,
}

/// A computed group of five reference levels. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotSet {
    pub session: SessionKind,
    /// Trading date of the session the OHLC came from.
    pub session_date: NaiveDate,
    pub computed_at: DateTime<Utc>,
    pub r2: Decimal,
    pub r1: Decimal,
    pub pivot: Decimal,
    pub s1: Decimal,
    pub s2: Decimal,
}

impl PivotSet {
    pub fn id(&self) -> PivotSetId {
        PivotSetId {
            session: self.session,
            computed_at: self.computed_at,
        }
    }

    pub fn level(&self, level: Level) -> Decimal {
        match level {
            Level::R2 => self.r2,
            Level::R1 => self.r1,
            Level::P => self.pivot,
            Level::S1 => self.s1,
            Level::S2 => self.s2,
        }
    }

    /// Width of the R2..S2 corridor.
    pub fn range_width(&self) -> Decimal {
        self.r2 - self.s2
    }

    pub fn midpoint(&self) -> Decimal {
        (self.r2 + self.s2) / Decimal::TWO
    }
}

impl fmt::Display for PivotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} R2={} R1={} P={} S1={} S2={}",
            self.session, self.session_date, self.r2, self.r1, self.pivot, self.s1, self.s2
        )
    }
}
