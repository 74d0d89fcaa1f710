//! pivotwatch core: the pivot selection and breakout decision engine.
//!
//! This crate contains everything that decides, and nothing that waits:
//! - Domain types (pivot sets, samples, signals, session kinds)
//! - Floor-trader pivot calculator and session quality gate
//! - Session scheduler keyed on UTC boundaries
//! - Tension tracker, breakout validator and volatility monitor
//! - Pivot state machine with daily switch budget and neutral mode
//! - The `Engine` that wires them per sample, plus its snapshot schema
//! - BLAKE3 decision fingerprints for replay comparison

pub mod breakout;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod pivot;
pub mod schedule;
pub mod snapshot;
pub mod state_machine;
pub mod tension;
pub mod volatility;

pub use config::{ConfigError, EngineConfig, SessionHours, SessionQuality, Thresholds};
pub use engine::{Engine, EngineEvent};
pub use snapshot::Snapshot;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner moves across tasks is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::PivotSet>();
        require_sync::<domain::PivotSet>();
        require_send::<domain::PriceSample>();
        require_sync::<domain::PriceSample>();
        require_send::<domain::Signal>();
        require_sync::<domain::Signal>();
        require_send::<state_machine::PivotState>();
        require_sync::<state_machine::PivotState>();
        require_send::<state_machine::Transition>();
        require_sync::<state_machine::Transition>();
        require_send::<Snapshot>();
        require_sync::<Snapshot>();
        require_send::<Engine>();
        require_sync::<Engine>();
        require_send::<EngineEvent>();
        require_sync::<EngineEvent>();
        require_send::<Thresholds>();
        require_sync::<Thresholds>();
    }
}
