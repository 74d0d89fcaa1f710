//! Decision fingerprints: a BLAKE3 digest over an ordered event sequence.
//!
//! Each event is hashed as one line of canonical JSON, so two runs agree on
//! the fingerprint exactly when they emitted the same events in the same order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::EngineEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayFingerprint {
    pub hash: String,
    pub events: usize,
}

impl fmt::Display for ReplayFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} events)", self.hash, self.events)
    }
}

#[derive(Debug, Default, Clone)]
pub struct FingerprintHasher {
    hasher: blake3::Hasher,
    events: usize,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let json = serde_json::to_vec(value)?;
        self.hasher.update(&json);
        self.hasher.update(b"\n");
        self.events += 1;
        Ok(())
    }

    pub fn finish(&self) -> ReplayFingerprint {
        ReplayFingerprint {
            hash: self.hasher.finalize().to_hex().to_string(),
            events: self.events,
        }
    }
}

/// Fingerprint the decision events (signals, suppressions, transitions) in `events`.
pub fn fingerprint_decisions<'a>(
    events: impl IntoIterator<Item = &'a EngineEvent>,
) -> Result<ReplayFingerprint, serde_json::Error> {
    let mut hasher = FingerprintHasher::new();
    for event in events.into_iter().filter(|e| e.is_decision()) {
        hasher.update(event)?;
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_stable() {
        let a = fingerprint_decisions(std::iter::empty()).unwrap();
        let b = FingerprintHasher::new().finish();
        assert_eq!(a, b);
        assert_eq!(a.events, 0);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn order_matters() {
        let mut ab = FingerprintHasher::new();
        ab.update(&"a").unwrap();
        ab.update(&"b").unwrap();
        let mut ba = FingerprintHasher::new();
        ba.update(&"b").unwrap();
        ba.update(&"a").unwrap();
        assert_ne!(ab.finish(), ba.finish());
    }
}
