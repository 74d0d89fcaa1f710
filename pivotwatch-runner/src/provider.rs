//! Collaborator traits and structured error types.
//!
//! The orchestrator only talks to the outside world through these seams so
//! live feeds, replays and test doubles are interchangeable.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use pivotwatch_core::domain::{PriceSample, SessionKind, SessionOhlc, Signal};
use pivotwatch_core::Thresholds;

/// Structured error types for market data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("market data unavailable: {0}")]
    Unavailable(String),

    #[error("no samples in the {session} window for {date}")]
    NoSessionData { session: SessionKind, date: NaiveDate },

    #[error("malformed market data: {0}")]
    Malformed(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker open, retry in {remaining_secs}s")]
    CircuitOpen { remaining_secs: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Failures of the source itself, as opposed to bad or missing data.
    /// Only these count towards the circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::Unavailable(_) | DataError::Timeout(_) | DataError::Io(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("signal sink failed: {0}")]
    Failed(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of price samples and finished-session OHLC.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Samples strictly after `since`, oldest first. May be empty.
    async fn recent_samples(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, DataError>;

    async fn session_ohlc(
        &self,
        session: SessionKind,
        date: NaiveDate,
    ) -> Result<SessionOhlc, DataError>;
}

/// Receiver of emitted signals. Delivery is at-least-once; the orchestrator
/// never retries a failed publish.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn publish(&self, signal: &Signal) -> Result<(), SinkError>;
}

/// Thresholds in force for the next tick.
pub trait ThresholdSource: Send + Sync {
    fn current(&self) -> Thresholds;
}
