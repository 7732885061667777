// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Sub-sampling of a raw tick clock into ring-buffer slots.

use super::{MonotonicClock, Timestamp};
use crate::core::{Result, SyncError};
use std::time::Duration;

/// Derived quantization of a raw clock domain.
///
/// A timestamp's slot index is `timestamp >> shift`; its low `shift` bits,
/// normalized to `[0, 1)`, are the interpolation weight between that slot and
/// the next. Computed once at session start and copied freely afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedClock {
    frequency: u64,
    shift: u32,
    capacity_bits: u32,
}

impl QuantizedClock {
    /// Derive the quantization for a clock running at `frequency` ticks/s.
    ///
    /// `shift` is the smallest value with `frequency >> shift < max_poll_rate_hz`;
    /// `capacity_bits` is the smallest value (at least 1) whose slot count covers
    /// `max_latency_ms` of history at the quantized rate.
    pub fn new(frequency: u64, max_poll_rate_hz: u64, max_latency_ms: u64) -> Result<Self> {
        if max_poll_rate_hz == 0 {
            return Err(SyncError::Configuration(
                "max poll rate must be positive".into(),
            ));
        }
        if frequency == 0 {
            return Err(SyncError::Configuration(
                "clock frequency must be positive".into(),
            ));
        }

        let mut shift = 0u32;
        while frequency.checked_shr(shift).unwrap_or(0) >= max_poll_rate_hz {
            shift += 1;
        }

        let rate = frequency.checked_shr(shift).unwrap_or(0) as u128;
        let required_slots = rate * max_latency_ms as u128 / 1000;
        let capacity_bits = required_slots
            .checked_next_power_of_two()
            .map(|slots| slots.trailing_zeros())
            .unwrap_or(u128::BITS)
            .max(1);

        Ok(Self {
            frequency,
            shift,
            capacity_bits,
        })
    }

    /// Derive the quantization from a live clock's reported frequency.
    pub fn from_clock(
        clock: &dyn MonotonicClock,
        max_poll_rate_hz: u64,
        max_latency_ms: u64,
    ) -> Result<Self> {
        let frequency = clock.frequency().ok_or_else(|| {
            SyncError::Configuration(format!(
                "clock '{}' cannot report its frequency",
                clock.description()
            ))
        })?;
        let quantized = Self::new(frequency, max_poll_rate_hz, max_latency_ms)?;
        tracing::debug!(
            frequency,
            shift = quantized.shift,
            capacity_bits = quantized.capacity_bits,
            "Derived quantized clock"
        );
        Ok(quantized)
    }

    #[inline]
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    #[inline]
    pub fn shift(&self) -> u32 {
        self.shift
    }

    #[inline]
    pub fn capacity_bits(&self) -> u32 {
        self.capacity_bits
    }

    /// Number of ring-buffer slots implied by `capacity_bits`.
    #[inline]
    pub fn capacity(&self) -> u64 {
        1u64.checked_shl(self.capacity_bits).unwrap_or(u64::MAX)
    }

    /// Slots per second after quantization.
    #[inline]
    pub fn slot_rate_hz(&self) -> u64 {
        self.frequency >> self.shift
    }

    /// Wall-clock length of one slot.
    pub fn slot_duration(&self) -> Duration {
        let ticks = 1u128 << self.shift;
        Duration::from_nanos((ticks * 1_000_000_000 / self.frequency as u128) as u64)
    }

    /// Slot index containing `timestamp`.
    #[inline]
    pub fn quantize(&self, timestamp: Timestamp) -> u64 {
        timestamp >> self.shift
    }

    /// Position of `timestamp` within its slot, in `[0, 1)`.
    #[inline]
    pub fn fraction(&self, timestamp: Timestamp) -> f32 {
        if self.shift == 0 {
            return 0.0;
        }
        let mask = (1u64 << self.shift) - 1;
        ((timestamp & mask) as f64 / (1u64 << self.shift) as f64) as f32
    }

    /// First tick of slot `index`.
    #[inline]
    pub fn slot_start(&self, index: u64) -> Timestamp {
        index << self.shift
    }

    /// Convert a duration into ticks of this clock domain.
    pub fn ticks_from_duration(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * self.frequency as u128 / 1_000_000_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clocks::ManualClock;

    #[test]
    fn test_nanosecond_clock_scenario() {
        let q = QuantizedClock::new(1_000_000_000, 1536, 4000).unwrap();
        assert_eq!(q.shift(), 20);
        assert_eq!(q.slot_rate_hz(), 953);
        assert_eq!(q.capacity_bits(), 12);
        assert_eq!(q.capacity(), 4096);
    }

    #[test]
    fn test_shift_is_minimal() {
        let cases = [
            (1u64, 1u64),
            (1, 2),
            (1_000, 1),
            (1_000_000_000, 1536),
            (10_000_000, 1000),
            (3_579_545, 1536),
            (u64::MAX, 7),
            (24_000_000, 24_000_000),
        ];
        for (frequency, rate) in cases {
            let q = QuantizedClock::new(frequency, rate, 1000).unwrap();
            let shift = q.shift();
            assert!(frequency.checked_shr(shift).unwrap_or(0) < rate);
            if shift > 0 {
                assert!(frequency >> (shift - 1) >= rate, "{frequency} / {rate}");
            }
        }
    }

    #[test]
    fn test_frequency_below_rate_needs_no_shift() {
        let q = QuantizedClock::new(1000, 1536, 1000).unwrap();
        assert_eq!(q.shift(), 0);
        assert_eq!(q.fraction(12345), 0.0);
    }

    #[test]
    fn test_capacity_bits_bounded_below() {
        let q = QuantizedClock::new(1_000_000_000, 1536, 0).unwrap();
        assert_eq!(q.capacity_bits(), 1);
    }

    #[test]
    fn test_rejects_non_positive_poll_rate() {
        assert!(matches!(
            QuantizedClock::new(1_000_000_000, 0, 4000),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_clock_without_frequency() {
        let clock = ManualClock::without_frequency();
        assert!(matches!(
            QuantizedClock::from_clock(&clock, 1536, 4000),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_quantize_and_fraction() {
        let q = QuantizedClock::new(1_000_000_000, 1536, 4000).unwrap();
        let half = 1u64 << 19;
        let t = q.slot_start(102) + half;
        assert_eq!(q.quantize(t), 102);
        assert_eq!(q.fraction(t), 0.5);
        assert_eq!(q.fraction(q.slot_start(7)), 0.0);
    }

    #[test]
    fn test_slot_duration() {
        let q = QuantizedClock::new(1_000_000_000, 1536, 4000).unwrap();
        assert_eq!(q.slot_duration(), Duration::from_nanos(1 << 20));
        assert_eq!(q.ticks_from_duration(Duration::from_millis(2)), 2_000_000);
    }
}
