//! Deterministic replay of a recorded sample log.
//!
//! The full orchestrator runs against a simulated clock that steps through
//! the log. Session pivots are aggregated from the log itself, signals go to
//! a memory sink and nothing is persisted, so the same log and config always
//! give the same fingerprint.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::info;

use pivotwatch_core::domain::{PivotSet, SessionKind, SessionOhlc, Signal};
use pivotwatch_core::fingerprint::{fingerprint_decisions, ReplayFingerprint};
use pivotwatch_core::schedule::last_trading_day;
use pivotwatch_core::state_machine::{PivotState, Transition};
use pivotwatch_core::{ConfigError, Engine, EngineConfig, EngineEvent};

use crate::config::ServiceSettings;
use crate::feed::{ReplayMarketData, SampleLog};
use crate::orchestrator::Orchestrator;
use crate::sink::MemorySink;
use crate::thresholds::StaticThresholds;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("sample log is empty")]
    EmptyLog,

    #[error("replay step must be positive")]
    InvalidStep,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to fingerprint decisions: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Simulated time between ticks. Defaults to the poll interval.
    pub step: Option<Duration>,
    /// Classic OHLC for the last trading day before the log starts.
    pub seed: Option<SessionOhlc>,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub samples: usize,
    pub ticks: usize,
    pub events: Vec<EngineEvent>,
    pub signals: Vec<Signal>,
    pub transitions: Vec<Transition>,
    pub tension_zones: usize,
    pub pivot_sets: Vec<PivotSet>,
    pub final_state: Option<PivotState>,
    pub fingerprint: ReplayFingerprint,
}

pub async fn replay(
    config: &EngineConfig,
    settings: &ServiceSettings,
    log: SampleLog,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    config.validate()?;
    let (Some(start), Some(end)) = (log.first_timestamp(), log.last_timestamp()) else {
        return Err(ReplayError::EmptyLog);
    };
    let step = options
        .step
        .unwrap_or_else(|| Duration::seconds(settings.poll_interval_secs as i64));
    if step <= Duration::zero() {
        return Err(ReplayError::InvalidStep);
    }

    let samples = log.len();
    let mut market = ReplayMarketData::new(log, config.sessions.clone());
    if let Some(seed) = options.seed {
        market = market.with_session(SessionKind::Classic, last_trading_day(start.date_naive()), seed);
    }

    let mut orchestrator = Orchestrator::new(
        Engine::new(config.clone()),
        market,
        MemorySink::new(),
        StaticThresholds(config.thresholds.clone()),
        settings.clone(),
    );

    let mut events = Vec::new();
    let mut ticks = 0;
    let mut now: DateTime<Utc> = start;
    loop {
        orchestrator.market().set_horizon(now);
        events.extend(orchestrator.tick(now).await.events);
        ticks += 1;
        if now >= end {
            break;
        }
        now = (now + step).min(end);
    }

    let fingerprint = fingerprint_decisions(&events)?;
    let mut report = ReplayReport {
        samples,
        ticks,
        signals: Vec::new(),
        transitions: Vec::new(),
        tension_zones: 0,
        pivot_sets: Vec::new(),
        final_state: orchestrator.engine().state().cloned(),
        fingerprint,
        events: Vec::new(),
    };
    for event in &events {
        match event {
            EngineEvent::Signal(s) => report.signals.push(s.clone()),
            EngineEvent::Transition(t) => report.transitions.push(t.clone()),
            EngineEvent::Tension(_) => report.tension_zones += 1,
            EngineEvent::Bootstrapped(p) | EngineEvent::PivotEligible(p) => {
                report.pivot_sets.push(p.clone())
            }
            _ => {}
        }
    }
    report.events = events;

    info!(
        samples,
        ticks,
        signals = report.signals.len(),
        transitions = report.transitions.len(),
        fingerprint = %report.fingerprint,
        "replay finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_log_is_an_error() {
        let err = replay(
            &EngineConfig::default(),
            &ServiceSettings::default(),
            SampleLog::default(),
            ReplayOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReplayError::EmptyLog));
    }
}
