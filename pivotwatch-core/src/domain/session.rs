//! Session kinds and intraday market sessions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SessionHours;

/// The session whose OHLC seeds a pivot set.
///
/// Ordering follows switch priority: `Europe > Asia > Classic`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Full calendar day.
    Classic,
    Asia,
    Europe,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [SessionKind::Classic, SessionKind::Asia, SessionKind::Europe];

    /// Switch priority; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            SessionKind::Classic => 0,
            SessionKind::Asia => 1,
            SessionKind::Europe => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Classic => "classic",
            SessionKind::Asia => "asia",
            SessionKind::Europe => "europe",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown session kind '{0}' (expected classic, asia or europe)")]
pub struct UnknownSession(pub String);

impl FromStr for SessionKind {
    type Err = UnknownSession;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" => Ok(SessionKind::Classic),
            "asia" => Ok(SessionKind::Asia),
            "europe" => Ok(SessionKind::Europe),
            other => Err(UnknownSession(other.to_string())),
        }
    }
}

/// The trading session a given instant falls into.
///
/// Anything outside the Asia and Europe windows counts as the US session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSession {
    Asia,
    Europe,
    Us,
}

impl MarketSession {
    pub fn at(ts: DateTime<Utc>, hours: &SessionHours) -> Self {
        let hour = ts.hour();
        if (hours.asia_start_hour..hours.asia_end_hour).contains(&hour) {
            MarketSession::Asia
        } else if (hours.europe_start_hour..hours.europe_end_hour).contains(&hour) {
            MarketSession::Europe
        } else {
            MarketSession::Us
        }
    }
}

impl fmt::Display for MarketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketSession::Asia => "asia",
            MarketSession::Europe => "europe",
            MarketSession::Us => "us",
        };
        f.write_str(s)
    }
}
