//! The tick loop.
//!
//! One orchestrator owns one engine. Fetches run concurrently inside a tick,
//! but their results are applied from this task only, in time order.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pivotwatch_core::domain::{PriceSample, SessionKind, Signal};
use pivotwatch_core::schedule::last_trading_day;
use pivotwatch_core::state_machine::Transition;
use pivotwatch_core::{Engine, EngineConfig, EngineEvent};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ServiceSettings;
use crate::provider::{DataError, MarketData, SignalSink, SinkError, ThresholdSource};
use crate::store::{PersistenceError, StateStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceHealth {
    Healthy,
    /// Saves have been failing since `since`; state lives only in memory.
    Degraded { since: DateTime<Utc>, last_error: String },
}

impl PersistenceHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PersistenceHealth::Degraded { .. })
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub at: Option<DateTime<Utc>>,
    pub events: Vec<EngineEvent>,
    pub samples_applied: usize,
    pub samples_rejected: usize,
    pub fetch_failures: usize,
    pub publish_failures: usize,
    pub persisted: bool,
}

impl TickReport {
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::Signal(s) => Some(s),
            _ => None,
        })
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::Transition(t) => Some(t),
            _ => None,
        })
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, DataError>
where
    F: Future<Output = Result<T, DataError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(DataError::Timeout(limit)))
}

pub struct Orchestrator<M, K, T> {
    engine: Engine,
    market: M,
    sink: K,
    thresholds: T,
    store: Option<Box<dyn StateStore>>,
    settings: ServiceSettings,
    breaker: CircuitBreaker,
    health: PersistenceHealth,
    dirty: bool,
}

impl<M, K, T> Orchestrator<M, K, T>
where
    M: MarketData,
    K: SignalSink,
    T: ThresholdSource,
{
    /// In-memory orchestrator around an existing engine.
    pub fn new(engine: Engine, market: M, sink: K, thresholds: T, settings: ServiceSettings) -> Self {
        let breaker =
            CircuitBreaker::new(settings.breaker_failure_threshold, settings.breaker_cooldown());
        Self {
            engine,
            market,
            sink,
            thresholds,
            store: None,
            settings,
            breaker,
            health: PersistenceHealth::Healthy,
            dirty: false,
        }
    }

    /// Restore from `store` if it holds a snapshot, else start fresh.
    ///
    /// An unreadable state file is logged and ignored; the next save
    /// overwrites it.
    pub fn open(
        config: EngineConfig,
        market: M,
        sink: K,
        thresholds: T,
        settings: ServiceSettings,
        store: Box<dyn StateStore>,
    ) -> Self {
        let engine = match store.load() {
            Ok(Some(snapshot)) => {
                info!(
                    active = %snapshot.state.active_pivot,
                    neutral = snapshot.state.is_neutral,
                    saved_at = %snapshot.saved_at,
                    "restored state"
                );
                Engine::restore(config, snapshot)
            }
            Ok(None) => {
                info!("no saved state, starting fresh");
                Engine::new(config)
            }
            Err(e) => {
                warn!(error = %e, "could not load saved state, starting fresh");
                Engine::new(config)
            }
        };
        let mut orchestrator = Self::new(engine, market, sink, thresholds, settings);
        orchestrator.store = Some(store);
        orchestrator
    }

    pub fn with_store(mut self, store: Box<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn health(&self) -> &PersistenceHealth {
        &self.health
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one processing cycle at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            at: Some(now),
            ..TickReport::default()
        };

        if let Err(e) = self.engine.set_thresholds(self.thresholds.current()) {
            warn!(error = %e, "rejected threshold update");
        }
        report.events.extend(self.engine.advance_clock(now));

        let mut sessions_processed = false;
        if self.breaker.is_allowed(now) {
            let mut transient = false;
            sessions_processed = self.fetch_and_apply(now, &mut report, &mut transient).await;
            if transient {
                if self.breaker.record_failure(now) {
                    warn!(
                        cooldown_secs = self.settings.breaker_cooldown_secs,
                        "market data circuit breaker opened"
                    );
                }
            } else {
                self.breaker.record_success();
            }
        } else {
            let skipped = DataError::CircuitOpen {
                remaining_secs: self.breaker.remaining_cooldown(now).num_seconds(),
            };
            debug!(error = %skipped, "skipping fetch");
            report.fetch_failures += 1;
        }

        self.publish(&mut report).await;

        if sessions_processed || report.events.iter().any(EngineEvent::is_state_change) {
            self.dirty = true;
        }
        if self.dirty {
            report.persisted = self.persist(now).await;
        }
        if let PersistenceHealth::Degraded { since, last_error } = &self.health {
            error!(%since, error = %last_error, "state persistence degraded, running in memory only");
        }
        report
    }

    /// Returns whether any session close was acknowledged.
    async fn fetch_and_apply(
        &mut self,
        now: DateTime<Utc>,
        report: &mut TickReport,
        transient: &mut bool,
    ) -> bool {
        let limit = self.settings.fetch_timeout();
        let due = self.engine.due_sessions(now);
        let since = self.engine.last_sample_at();
        let seed_date =
            (!self.engine.is_bootstrapped()).then(|| last_trading_day(now.date_naive()));

        let market = &self.market;
        let seed = async {
            match seed_date {
                Some(date) => Some(bounded(limit, market.session_ohlc(SessionKind::Classic, date)).await),
                None => None,
            }
        };
        let sessions = join_all(
            due.iter()
                .map(|close| bounded(limit, market.session_ohlc(close.session, close.session_date))),
        );
        let samples = bounded(limit, market.recent_samples(since));
        let (seed, sessions, samples) = tokio::join!(seed, sessions, samples);

        let mut note = |report: &mut TickReport, err: &DataError| {
            if err.is_transient() {
                report.fetch_failures += 1;
                *transient = true;
            }
        };

        if let (Some(date), Some(result)) = (seed_date, seed) {
            match result {
                Ok(ohlc) => match self.engine.seed_classic(date, &ohlc, now) {
                    Ok(events) => report.events.extend(events),
                    Err(e) => warn!(%date, error = %e, "could not seed from last trading day"),
                },
                Err(e) => {
                    debug!(%date, error = %e, "seed session unavailable, retrying next tick");
                    note(report, &e);
                }
            }
        }

        let samples = match samples {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "sample fetch failed, no new data this tick");
                note(report, &e);
                Vec::new()
            }
        };

        // Interleave closes with the samples around them so every sample
        // is judged against the pivots that existed at its timestamp.
        let mut samples = samples.into_iter().peekable();
        let mut processed = false;
        for (close, result) in due.iter().zip(sessions) {
            while let Some(sample) = samples.next_if(|s| s.timestamp < close.fires_at) {
                self.ingest(&sample, report);
            }
            match result {
                Ok(ohlc) => {
                    processed = true;
                    match self.engine.apply_session(close, &ohlc) {
                        Ok(events) => report.events.extend(events),
                        Err(e) => warn!(
                            session = %close.session,
                            date = %close.session_date,
                            error = %e,
                            "session pivots not computed"
                        ),
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(session = %close.session, error = %e, "session fetch failed");
                    } else {
                        debug!(session = %close.session, error = %e, "session data not ready");
                    }
                    note(report, &e);
                }
            }
        }
        for sample in samples {
            self.ingest(&sample, report);
        }
        processed
    }

    fn ingest(&mut self, sample: &PriceSample, report: &mut TickReport) {
        let events = self.engine.ingest(sample);
        if events
            .iter()
            .any(|e| matches!(e, EngineEvent::SampleRejected { .. }))
        {
            report.samples_rejected += 1;
        } else {
            report.samples_applied += 1;
        }
        report.events.extend(events);
    }

    async fn publish(&self, report: &mut TickReport) {
        let limit = self.settings.publish_timeout();
        let mut failures = 0;
        for signal in report.signals() {
            let result = tokio::time::timeout(limit, self.sink.publish(signal))
                .await
                .unwrap_or(Err(SinkError::Timeout(limit)));
            if let Err(e) = result {
                warn!(
                    direction = %signal.direction,
                    level = %signal.level,
                    error = %e,
                    "signal publish failed"
                );
                failures += 1;
            }
        }
        report.publish_failures += failures;
    }

    /// Save with exponential backoff. Returns whether the save landed.
    async fn persist(&mut self, now: DateTime<Utc>) -> bool {
        let Some(store) = self.store.as_ref() else {
            self.dirty = false;
            return false;
        };
        let Some(snapshot) = self.engine.snapshot(now) else {
            return false;
        };

        let attempts = self.settings.persist_attempts.max(1);
        let mut delay = self.settings.persist_backoff();
        let mut last_error = None;
        for attempt in 1..=attempts {
            match store.save(&snapshot) {
                Ok(()) => {
                    if self.health.is_degraded() {
                        info!("state persistence recovered");
                    }
                    self.health = PersistenceHealth::Healthy;
                    self.dirty = false;
                    return true;
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "state save failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        let since = match &self.health {
            PersistenceHealth::Degraded { since, .. } => *since,
            PersistenceHealth::Healthy => now,
        };
        self.health = PersistenceHealth::Degraded { since, last_error };
        false
    }

    /// Save once, surfacing the error. Used at shutdown.
    pub fn save_now(&mut self, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let (Some(store), Some(snapshot)) = (self.store.as_ref(), self.engine.snapshot(now)) else {
            return Ok(());
        };
        store.save(&snapshot)?;
        self.dirty = false;
        Ok(())
    }

    /// Tick on the poll interval until `shutdown` resolves, then save.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), PersistenceError>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(poll_secs = self.settings.poll_interval_secs, "tick loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    debug!(
                        applied = report.samples_applied,
                        rejected = report.samples_rejected,
                        events = report.events.len(),
                        "tick"
                    );
                }
            }
        }
        info!("shutting down, saving state");
        self.save_now(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn degraded_health_reports_itself() {
        let at = Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap();
        assert!(!PersistenceHealth::Healthy.is_degraded());
        assert!(PersistenceHealth::Degraded { since: at, last_error: "disk".into() }.is_degraded());
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result: Result<(), DataError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DataError::Timeout(_))));
    }
}
