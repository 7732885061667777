// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{MonotonicClock, Timestamp};
use std::time::Instant;

/// Nanosecond clock anchored at construction.
pub struct SystemClock {
    start_time: Instant,
    description: String,
}

impl SystemClock {
    pub const FREQUENCY: u64 = 1_000_000_000;

    pub fn new() -> Self {
        Self::with_description("System Clock".to_string())
    }

    pub fn with_description(description: String) -> Self {
        Self {
            start_time: Instant::now(),
            description,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    #[inline]
    fn now_ticks(&self) -> Timestamp {
        self.start_time.elapsed().as_nanos() as Timestamp
    }

    fn frequency(&self) -> Option<u64> {
        Some(Self::FREQUENCY)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ticks_start_at_construction() {
        let clock = SystemClock::new();
        // Anchored at `new`, not at boot or the epoch.
        assert!(clock.now_ticks() < SystemClock::FREQUENCY);
        assert_eq!(clock.frequency(), Some(SystemClock::FREQUENCY));
        assert_eq!(clock.description(), "System Clock");
    }

    #[test]
    fn test_sleep_advances_in_nanoseconds() {
        let clock = SystemClock::with_description("camera host".to_string());
        let before = clock.now_ticks();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = clock.now_ticks() - before;
        assert!(elapsed >= 5 * SystemClock::FREQUENCY / 1_000, "elapsed {elapsed} ticks");
        assert_eq!(clock.description(), "camera host");
    }

    #[test]
    fn test_readings_never_decrease_across_threads() {
        let clock = std::sync::Arc::new(SystemClock::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = std::sync::Arc::clone(&clock);
                std::thread::spawn(move || {
                    let readings: Vec<Timestamp> = (0..1_000).map(|_| clock.now_ticks()).collect();
                    readings.windows(2).all(|w| w[0] <= w[1])
                })
            })
            .collect();
        for reader in readers {
            assert!(reader.join().unwrap());
        }
    }
}
