//! BDD scenarios for the decision engine
//!
//! These tests drive `Engine` the way the orchestrator does:
//! - Pivot computation from session OHLC
//! - Breakout confirmation and retracement
//! - Tension zones
//! - Pivot switching, neutral mode, restarts

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use pivotwatch_core::domain::{Direction, Level, PriceSample, SessionKind, SessionOhlc, SignalReason};
use pivotwatch_core::fingerprint::fingerprint_decisions;
use pivotwatch_core::state_machine::{PivotMode, TransitionReason};
use pivotwatch_core::{Engine, EngineConfig, EngineEvent};

// ── Helpers ──────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap()
}

fn minute(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

fn seeded_engine() -> Engine {
    seeded_engine_with(EngineConfig::default())
}

fn seeded_engine_with(config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config);
    let events = engine
        .seed_classic(
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            &SessionOhlc::new(dec!(2050), dec!(2020), dec!(2040)),
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 5, 0).unwrap(),
        )
        .expect("seed");
    assert!(matches!(events[..], [EngineEvent::Bootstrapped(_)]));
    engine
}

fn feed(engine: &mut Engine, path: &[(i64, Decimal)]) -> Vec<EngineEvent> {
    path.iter()
        .flat_map(|(m, price)| engine.ingest(&PriceSample::new(minute(*m), *price)))
        .collect()
}

fn signals(events: &[EngineEvent]) -> Vec<&pivotwatch_core::domain::Signal> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Signal(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn steady(from: i64, to: i64, price: Decimal) -> Vec<(i64, Decimal)> {
    (from..=to).map(|m| (m, price)).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn bdd_scenario_classic_pivots_from_reference_ohlc() {
    // GIVEN a seeded engine with the classic session {H=2050, L=2020, C=2040}
    let engine = seeded_engine();

    // WHEN we inspect the active pivot set
    let active = &engine.state().unwrap().active_pivot;

    // THEN the levels match the floor-trader formulas rounded to cents
    assert_eq!(active.session, SessionKind::Classic);
    assert_eq!(active.pivot, dec!(2036.67));
    assert_eq!(active.r1, dec!(2053.33));
    assert_eq!(active.s1, dec!(2023.33));
    assert_eq!(active.r2, dec!(2066.67));
    assert_eq!(active.s2, dec!(2006.67));
}

#[test]
fn bdd_scenario_stabilized_breakout_emits_signal() {
    // GIVEN the classic set active with R2 = 2066.67
    let mut engine = seeded_engine();

    // WHEN price touches 2069 and stays inside [2064.67, 2071.67] for 15 minutes
    let mut path = steady(0, 15, dec!(2069));
    path[5].1 = dec!(2064.8);
    path[9].1 = dec!(2071.5);
    let events = feed(&mut engine, &path);

    // THEN exactly one up signal is emitted at t0 + 15 min
    let emitted = signals(&events);
    assert_eq!(emitted.len(), 1);
    let signal = emitted[0];
    assert_eq!(signal.timestamp, minute(15));
    assert_eq!(signal.crossed_at, t0());
    assert_eq!(signal.direction, Direction::Up);
    assert_eq!(signal.level, Level::R2);
    assert_eq!(signal.reason, SignalReason::BreakoutConfirmed);
    assert_eq!(signal.breakout_amplitude, dec!(2.33));
    assert_eq!(signal.active_pivot_levels.r2, dec!(2066.67));
}

#[test]
fn bdd_scenario_retracement_discards_candidate() {
    // GIVEN the classic set active
    let mut engine = seeded_engine();

    // WHEN price breaks to 2069 but retraces to 2064.00 at minute 10
    let mut path = steady(0, 9, dec!(2069));
    path.push((10, dec!(2064.00)));
    path.extend(steady(11, 30, dec!(2066)));
    let events = feed(&mut engine, &path);

    // THEN no signal is emitted and the candidate was discarded
    assert!(signals(&events).is_empty());
    assert!(events.iter().any(|e| matches!(e, EngineEvent::BreakoutDiscarded { .. })));

    // AND the breach and the failed stabilization both mark state for saving
    let pending = events
        .iter()
        .find(|e| matches!(e, EngineEvent::BreakoutPending(_)))
        .unwrap();
    assert!(pending.is_state_change());
    let discarded = events
        .iter()
        .find(|e| matches!(e, EngineEvent::BreakoutDiscarded { .. }))
        .unwrap();
    assert!(discarded.is_state_change());
    let stats: u32 = engine.state().unwrap().level_stats.values().map(|s| s.invalidated).sum();
    assert!(stats >= 1);
}

#[test]
fn bdd_scenario_third_touch_raises_tension_zone_once() {
    // GIVEN the classic set active with R1 = 2053.33
    let mut engine = seeded_engine();

    // WHEN price touches R1 at minutes 0, 12 and 25, then again at 40
    let path = [
        (0, dec!(2053.5)),
        (6, dec!(2058)),
        (12, dec!(2053.0)),
        (18, dec!(2058)),
        (25, dec!(2053.9)),
        (32, dec!(2058)),
        (40, dec!(2053.4)),
    ];
    let events = feed(&mut engine, &path);

    // THEN a single tension zone is reported, on the third touch
    let zones: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Tension(z) => Some(z),
            _ => None,
        })
        .collect();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].level, Level::R1);
    assert_eq!(zones[0].detected_at, minute(25));
    assert_eq!(zones[0].touch_count, 3);
}

#[test]
fn bdd_scenario_breakout_switches_to_europe() {
    // GIVEN the classic set active and fresh Asia and Europe sets eligible
    let mut engine = seeded_engine();
    let due = engine.due_sessions(Utc.with_ymd_and_hms(2024, 3, 6, 13, 5, 0).unwrap());
    assert_eq!(due.len(), 2);
    for close in &due {
        let ohlc = match close.session {
            SessionKind::Asia => SessionOhlc::new(dec!(2045), dec!(2030), dec!(2040)),
            _ => SessionOhlc::new(dec!(2080), dec!(2050), dec!(2070)),
        };
        let events = engine.apply_session(close, &ohlc).expect("pivot set");
        assert!(matches!(events[..], [EngineEvent::PivotEligible(_)]));
    }

    // WHEN a classic R2 breakout is confirmed
    let events = feed(&mut engine, &steady(0, 15, dec!(2069)));

    // THEN the signal carries the classic levels and the active set becomes Europe
    let emitted = signals(&events);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].active_pivot_levels.session, SessionKind::Classic);

    let state = engine.state().unwrap();
    assert_eq!(state.mode(), PivotMode::Active(SessionKind::Europe));
    assert_eq!(state.switches_today, 1);
    assert_eq!(state.last_switch_at, Some(minute(15)));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Transition(t) if matches!(t.reason, TransitionReason::BreakoutSwitch { .. })
    )));

    // AND the scheduler does not fire the same closes again
    assert!(engine.due_sessions(minute(20)).is_empty());
}

#[test]
fn bdd_scenario_erratic_market_goes_neutral_then_recovers() {
    // GIVEN the classic set active, volatility gate off so only the
    // reversal rule is in play
    let mut config = EngineConfig::default();
    config.thresholds.volatility_threshold_pct = None;
    let mut engine = seeded_engine_with(config);

    // WHEN an up breakout confirms, then a down breakout confirms within the hour
    let mut path = steady(0, 15, dec!(2069));
    path.extend(steady(16, 30, dec!(2036)));
    path.extend(steady(31, 46, dec!(2004)));
    let events = feed(&mut engine, &path);

    // THEN only the first breakout signals and the machine is neutral
    assert_eq!(signals(&events).len(), 1);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::SignalSuppressed(_))));
    assert_eq!(engine.state().unwrap().mode(), PivotMode::Neutral);

    // WHEN price leaves the breach zone and a fresh up breakout confirms later
    let mut path = steady(47, 60, dec!(2036));
    path.extend(steady(61, 76, dec!(2069)));
    let events = feed(&mut engine, &path);

    // THEN neutral is left with a neutral-exit signal
    let emitted = signals(&events);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].reason, SignalReason::NeutralExit);
    assert_eq!(engine.state().unwrap().mode(), PivotMode::Active(SessionKind::Classic));
}

#[test]
fn bdd_scenario_out_of_order_sample_is_discarded() {
    // GIVEN an engine that has seen a sample at minute 10
    let mut engine = seeded_engine();
    feed(&mut engine, &[(10, dec!(2040))]);

    // WHEN an older sample arrives
    let events = feed(&mut engine, &[(5, dec!(2069))]);

    // THEN it is rejected and not applied
    assert!(matches!(events[..], [EngineEvent::SampleRejected { .. }]));
    assert_eq!(engine.last_sample_at(), Some(minute(10)));
}

#[test]
fn bdd_scenario_restart_resumes_from_snapshot() {
    // GIVEN an engine that switched to Europe
    let mut engine = seeded_engine();
    for close in engine.due_sessions(Utc.with_ymd_and_hms(2024, 3, 6, 13, 5, 0).unwrap()) {
        let ohlc = SessionOhlc::new(dec!(2080), dec!(2050), dec!(2070));
        engine.apply_session(&close, &ohlc).unwrap();
    }
    feed(&mut engine, &steady(0, 15, dec!(2069)));
    let snapshot = engine.snapshot(minute(16)).expect("bootstrapped");

    // WHEN the snapshot round-trips through JSON into a new engine
    let json = snapshot.to_json().unwrap();
    let restored = Engine::restore(
        EngineConfig::default(),
        pivotwatch_core::Snapshot::from_json(&json).unwrap(),
    );

    // THEN state, eligibility and scheduler marks carry over
    assert_eq!(restored.state(), engine.state());
    assert_eq!(restored.machine().unwrap().eligible().count(), 3);
    assert!(restored.due_sessions(minute(30)).is_empty());
    assert_eq!(restored.last_sample_at(), Some(minute(15)));
}

#[test]
fn bdd_scenario_replay_is_deterministic() {
    // GIVEN two identically seeded engines
    let mut a = seeded_engine();
    let mut b = seeded_engine();

    // WHEN both consume the same ordered stream
    let path: Vec<_> = (0..240)
        .map(|m| {
            let wave = Decimal::from((m * 7) % 23) - dec!(11);
            (m, dec!(2060) + wave)
        })
        .collect();
    let ea = feed(&mut a, &path);
    let eb = feed(&mut b, &path);

    // THEN they emit identical decision sequences
    assert_eq!(ea, eb);
    assert_eq!(
        fingerprint_decisions(&ea).unwrap(),
        fingerprint_decisions(&eb).unwrap()
    );
}

#[test]
fn bdd_scenario_narrow_session_is_skipped_for_the_day() {
    // GIVEN an Asia session with a 3 USD range
    let mut engine = seeded_engine();
    let due = engine.due_sessions(Utc.with_ymd_and_hms(2024, 3, 6, 4, 3, 0).unwrap());
    assert_eq!(due[0].session, SessionKind::Asia);

    // WHEN it is applied
    let result = engine.apply_session(&due[0], &SessionOhlc::new(dec!(2033), dec!(2030), dec!(2031)));

    // THEN it is rejected, acknowledged and never becomes eligible
    assert!(result.is_err());
    assert!(engine
        .due_sessions(Utc.with_ymd_and_hms(2024, 3, 6, 4, 10, 0).unwrap())
        .is_empty());
    assert_eq!(engine.machine().unwrap().eligible().count(), 1);
}

#[test]
fn bdd_scenario_excessive_volatility_enters_neutral() {
    // GIVEN the classic set active
    let mut engine = seeded_engine();

    // WHEN price swings 30 USD back and forth inside an hour
    let path: Vec<_> = (0..12)
        .map(|m| (m, if m % 2 == 0 { dec!(2030) } else { dec!(2060) }))
        .collect();
    let events = feed(&mut engine, &path);

    // THEN a volatility alert fires and the machine goes neutral
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Volatility(_))));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Transition(t) if matches!(t.reason, TransitionReason::ExcessiveVolatility { .. })
    )));
    assert_eq!(engine.state().unwrap().mode(), PivotMode::Neutral);
}

#[test]
fn bdd_scenario_oversized_window_is_refused_and_engine_keeps_running() {
    // GIVEN a seeded engine
    let mut engine = seeded_engine();

    // WHEN a reload asks for a touch window no clock arithmetic can hold
    let mut huge = engine.thresholds().clone();
    huge.touch_window_secs = u64::MAX;
    let result = engine.set_thresholds(huge);

    // THEN the update is refused, the old window stays, and ingest proceeds
    assert!(result.is_err());
    assert_eq!(engine.thresholds().touch_window_secs, 30 * 60);
    let events = feed(&mut engine, &steady(0, 2, dec!(2040)));
    assert!(signals(&events).is_empty());
}
