//! Pivot calculator: previous-session OHLC to a floor-trader pivot set.
//!
//! ```text
//! P  = (H + L + C) / 3
//! R1 = 2P - L        S1 = 2P - H
//! R2 = P + (H - L)   S2 = P - (H - L)
//! ```
//!
//! Levels are derived from the unrounded P and each rounded to cents.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::config::SessionQuality;
use crate::domain::{PivotSet, SessionKind, SessionOhlc};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PivotError {
    #[error("insufficient data for {session} pivots: {reason}")]
    InsufficientData { session: SessionKind, reason: String },

    #[error("{session} session range {range} is below the minimum {min}")]
    SessionRangeTooNarrow {
        session: SessionKind,
        range: Decimal,
        min: Decimal,
    },
}

const PRICE_DP: u32 = 2;

fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the pivot set for `session` from its finished OHLC.
pub fn compute(
    session: SessionKind,
    session_date: NaiveDate,
    ohlc: &SessionOhlc,
    computed_at: DateTime<Utc>,
) -> Result<PivotSet, PivotError> {
    let insufficient = |reason: String| PivotError::InsufficientData { session, reason };

    if ohlc.low <= Decimal::ZERO {
        return Err(insufficient(format!("non-positive low {}", ohlc.low)));
    }
    if ohlc.high < ohlc.low {
        return Err(insufficient(format!("high {} below low {}", ohlc.high, ohlc.low)));
    }
    if ohlc.close < ohlc.low || ohlc.close > ohlc.high {
        return Err(insufficient(format!(
            "close {} outside [{}, {}]",
            ohlc.close, ohlc.low, ohlc.high
        )));
    }

    let range = ohlc.high - ohlc.low;
    let p = (ohlc.high + ohlc.low + ohlc.close) / Decimal::from(3);

    Ok(PivotSet {
        session,
        session_date,
        computed_at,
        r2: round_price(p + range),
        r1: round_price(Decimal::TWO * p - ohlc.low),
        pivot: round_price(p),
        s1: round_price(Decimal::TWO * p - ohlc.high),
        s2: round_price(p - range),
    })
}

/// Reject sessions too quiet to produce useful levels.
pub fn check_session_quality(
    session: SessionKind,
    ohlc: &SessionOhlc,
    quality: &SessionQuality,
) -> Result<(), PivotError> {
    match quality.min_range(session) {
        Some(min) if ohlc.range() < min => Err(PivotError::SessionRangeTooNarrow {
            session,
            range: ohlc.range(),
            min,
        }),
        _ => Ok(()),
    }
}

/// Outcome of comparing a switch target against the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAssessment {
    Meaningful { max_shift: Decimal },
    /// No key level moved by at least the minimum shift.
    TooClose { max_shift: Decimal },
    /// Target corridor sits inside the active one.
    Nested,
}

impl SwitchAssessment {
    pub fn is_meaningful(self) -> bool {
        matches!(self, SwitchAssessment::Meaningful { .. })
    }
}

/// Decide whether switching from `active` to `target` changes anything.
///
/// Nested means the target's R2..S2 width is under 80% of the active width and
/// its midpoint within 30% of the active width from the active midpoint.
pub fn assess_switch(
    active: &PivotSet,
    target: &PivotSet,
    min_shift: Decimal,
    reject_nested: bool,
) -> SwitchAssessment {
    let max_shift = [
        (target.r2 - active.r2).abs(),
        (target.s2 - active.s2).abs(),
        (target.pivot - active.pivot).abs(),
    ]
    .into_iter()
    .max()
    .unwrap_or(Decimal::ZERO);

    if max_shift < min_shift {
        return SwitchAssessment::TooClose { max_shift };
    }

    if reject_nested {
        let width = active.range_width();
        let narrower = target.range_width() < width * Decimal::new(8, 1);
        let centred = (target.midpoint() - active.midpoint()).abs() < width * Decimal::new(3, 1);
        if narrower && centred {
            return SwitchAssessment::Nested;
        }
    }

    SwitchAssessment::Meaningful { max_shift }
}
