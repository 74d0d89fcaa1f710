//! Domain types for pivotwatch

pub mod levels;
pub mod sample;
pub mod session;
pub mod signal;

pub use levels::{Direction, Level, PivotSet, PivotSetId, SessionOhlc};
pub use sample::PriceSample;
pub use session::{MarketSession, SessionKind, UnknownSession};
pub use signal::{Signal, SignalReason};
