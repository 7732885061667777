// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{MonotonicClock, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// Clock whose ticks only move when told to.
///
/// Used for deterministic replay of recorded sessions and in tests. Setting
/// the clock backwards is clamped so the clock stays monotonic.
pub struct ManualClock {
    ticks: AtomicU64,
    frequency: Option<u64>,
    description: String,
}

impl ManualClock {
    pub fn new(frequency: u64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency: Some(frequency),
            description: "Manual Clock".to_string(),
        }
    }

    /// A clock that cannot report its frequency.
    pub fn without_frequency() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency: None,
            description: "Manual Clock (no frequency)".to_string(),
        }
    }

    pub fn set(&self, ticks: Timestamp) {
        self.ticks.fetch_max(ticks, Ordering::AcqRel);
    }

    pub fn advance(&self, ticks: u64) -> Timestamp {
        self.ticks.fetch_add(ticks, Ordering::AcqRel) + ticks
    }
}

impl MonotonicClock for ManualClock {
    #[inline]
    fn now_ticks(&self) -> Timestamp {
        self.ticks.load(Ordering::Acquire)
    }

    fn frequency(&self) -> Option<u64> {
        self.frequency
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ticks(), 0);
        clock.set(500);
        assert_eq!(clock.now_ticks(), 500);
        assert_eq!(clock.advance(25), 525);
        assert_eq!(clock.now_ticks(), 525);
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(1_000);
        clock.set(100);
        clock.set(50);
        assert_eq!(clock.now_ticks(), 100);
    }

    #[test]
    fn test_manual_clock_without_frequency() {
        assert_eq!(ManualClock::without_frequency().frequency(), None);
    }
}
