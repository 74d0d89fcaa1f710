//! Session scheduler: which session closes have fired and still need pivots.
//!
//! `due` is a pure query; a close only stops being due once it is
//! acknowledged, so a failed fetch is naturally retried on the next poll.
//! Acknowledgements are keyed by calendar date and survive restarts through
//! the snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::SessionHours;
use crate::domain::SessionKind;

/// A session close that needs its pivot set computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClose {
    pub session: SessionKind,
    pub session_date: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Close plus settle offset.
    pub fires_at: DateTime<Utc>,
}

fn at_hour(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    (date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour))).and_utc()
}

/// `[start, end)` of the OHLC window for `kind` on `date`.
///
/// Classic spans from midnight to the classic close.
pub fn session_window(
    kind: SessionKind,
    date: NaiveDate,
    hours: &SessionHours,
) -> (DateTime<Utc>, DateTime<Utc>) {
    match kind {
        SessionKind::Classic => (at_hour(date, 0), at_hour(date, hours.classic_close_hour)),
        SessionKind::Asia => (
            at_hour(date, hours.asia_start_hour),
            at_hour(date, hours.asia_end_hour),
        ),
        SessionKind::Europe => (
            at_hour(date, hours.europe_start_hour),
            at_hour(date, hours.europe_end_hour),
        ),
    }
}

pub fn session_close(kind: SessionKind, date: NaiveDate, hours: &SessionHours) -> SessionClose {
    let (window_start, window_end) = session_window(kind, date, hours);
    SessionClose {
        session: kind,
        session_date: date,
        window_start,
        window_end,
        fires_at: window_end + Duration::minutes(i64::from(hours.settle_offset_mins)),
    }
}

/// The most recent weekday strictly before `today`.
pub fn last_trading_day(today: NaiveDate) -> NaiveDate {
    let back = match today.weekday() {
        Weekday::Mon => 3,
        Weekday::Sun => 2,
        _ => 1,
    };
    today - Duration::days(back)
}

#[derive(Debug, Clone)]
pub struct SessionScheduler {
    hours: SessionHours,
    last_fired: BTreeMap<SessionKind, NaiveDate>,
}

impl SessionScheduler {
    pub fn new(hours: SessionHours) -> Self {
        Self {
            hours,
            last_fired: BTreeMap::new(),
        }
    }

    pub fn with_marks(hours: SessionHours, last_fired: BTreeMap<SessionKind, NaiveDate>) -> Self {
        Self { hours, last_fired }
    }

    pub fn hours(&self) -> &SessionHours {
        &self.hours
    }

    pub fn marks(&self) -> &BTreeMap<SessionKind, NaiveDate> {
        &self.last_fired
    }

    pub fn last_fired(&self, kind: SessionKind) -> Option<NaiveDate> {
        self.last_fired.get(&kind).copied()
    }

    /// Closes that have passed today and are not yet acknowledged, earliest first.
    ///
    /// The previous trading day's classic close is included too when the
    /// classic mark is older than that day, so a restart across midnight does
    /// not skip it. Without any classic mark the caller seeds instead.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<SessionClose> {
        let today = now.date_naive();
        let mut due: Vec<SessionClose> = SessionKind::ALL
            .into_iter()
            .filter(|kind| self.last_fired(*kind).map_or(true, |d| d < today))
            .map(|kind| session_close(kind, today, &self.hours))
            .filter(|close| now >= close.fires_at)
            .collect();
        let previous = last_trading_day(today);
        if self.last_fired(SessionKind::Classic).is_some_and(|d| d < previous) {
            due.push(session_close(SessionKind::Classic, previous, &self.hours));
        }
        due.sort_by_key(|c| c.fires_at);
        due
    }

    /// Mark `close` as processed. Never moves a mark backwards.
    pub fn acknowledge(&mut self, close: &SessionClose) {
        let mark = self.last_fired.entry(close.session).or_insert(close.session_date);
        if *mark < close.session_date {
            *mark = close.session_date;
        }
    }
}
