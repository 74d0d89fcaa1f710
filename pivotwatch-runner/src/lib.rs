//! pivotwatch runner: everything around the engine that waits on the world.
//!
//! - Collaborator traits for market data, signal sinks and threshold sources
//! - CSV sample logs, a live CSV feed and a replay feed with a movable horizon
//! - JSONL and in-memory signal sinks
//! - Atomic JSON state store
//! - Circuit breaker on the market data source
//! - The tick-driven `Orchestrator` and deterministic `replay`

pub mod circuit_breaker;
pub mod config;
pub mod feed;
pub mod orchestrator;
pub mod provider;
pub mod replay;
pub mod sink;
pub mod store;
pub mod thresholds;

pub use config::{PathsConfig, ServiceConfig, ServiceSettings};
pub use feed::{CsvMarketData, ReplayMarketData, SampleLog};
pub use orchestrator::{Orchestrator, PersistenceHealth, TickReport};
pub use provider::{DataError, MarketData, SignalSink, SinkError, ThresholdSource};
pub use replay::{replay, ReplayError, ReplayOptions, ReplayReport};
pub use sink::{JsonlSignalSink, MemorySink};
pub use store::{JsonStateStore, PersistenceError, StateStore};
pub use thresholds::{FileThresholds, StaticThresholds};
