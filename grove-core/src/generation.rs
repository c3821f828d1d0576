//! Refresh generation tracking

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counter, bumped once per successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    /// Create a new generation starting at 0
    pub fn new() -> Self {
        Self(0)
    }

    /// Create a generation from a raw value
    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw u64 value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared generation counter that many tasks can read and bump.
#[derive(Debug, Default)]
pub struct GenerationCounter(AtomicU64);

impl GenerationCounter {
    pub fn current(&self) -> Generation {
        Generation(self.0.load(Ordering::Acquire))
    }

    /// Bump and return the new generation
    pub fn advance(&self) -> Generation {
        Generation(self.0.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

/// Lifecycle of the mirrored checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    /// Clone in progress
    Cloning,
    /// Checkout available for reads
    Ready,
    /// Clone failed; nothing will ever be served
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_ordering() {
        let g1 = Generation::from_value(1);
        let g2 = Generation::from_value(2);
        assert!(g1 < g2);
        assert_eq!(Generation::new().value(), 0);
    }

    #[test]
    fn test_counter_advance() {
        let counter = GenerationCounter::default();
        assert_eq!(counter.current(), Generation::new());
        assert_eq!(counter.advance().value(), 1);
        assert_eq!(counter.advance().value(), 2);
        assert_eq!(counter.current().value(), 2);
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&CheckoutStatus::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
    }
}
