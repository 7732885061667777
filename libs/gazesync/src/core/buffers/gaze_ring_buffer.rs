// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Quantized-time history of per-channel gaze vectors.
//!
//! One slot per quantized time unit, `channel_count` samples per slot. A single
//! writer (the pose sampler) pushes whole slots; any number of correlators
//! read. Pushes and compound reads share one reader-writer lock, so a slot is
//! never observed with only some of its channels written.

use crate::core::math::Vec3;
use crate::core::{Result, SyncError};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

/// Capacity ceiling: construction fails at or above this many bits.
pub const MAX_CAPACITY_BITS: u32 = 20;

struct RingState {
    head: u64,
    samples: Box<[Vec3]>,
}

pub struct GazeRingBuffer {
    state: RwLock<RingState>,
    capacity_bits: u32,
    channel_count: usize,
}

impl GazeRingBuffer {
    pub fn new(capacity_bits: u32, channel_count: usize) -> Result<Self> {
        if capacity_bits >= MAX_CAPACITY_BITS {
            return Err(SyncError::CapacityOutOfRange {
                bits: capacity_bits,
            });
        }
        if channel_count == 0 {
            return Err(SyncError::Configuration(
                "gaze ring buffer needs at least one channel".into(),
            ));
        }
        let len = (1usize << capacity_bits) * channel_count;
        tracing::debug!(capacity_bits, channel_count, "Allocating gaze ring buffer");
        Ok(Self {
            state: RwLock::new(RingState {
                head: 0,
                samples: vec![Vec3::ZERO; len].into_boxed_slice(),
            }),
            capacity_bits,
            channel_count,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        1u64 << self.capacity_bits
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Next slot to be written.
    pub fn head(&self) -> u64 {
        self.state.read().head
    }

    /// Move `head` to an absolute slot, used once when sampling starts.
    pub fn set_head(&self, head: u64) {
        self.state.write().head = head;
    }

    #[inline]
    fn slot_range(&self, index: u64) -> std::ops::Range<usize> {
        let slot = (index & (self.capacity() - 1)) as usize;
        let start = slot * self.channel_count;
        start..start + self.channel_count
    }

    /// Write all channels of slot `head`, then advance `head` by one.
    ///
    /// `values` must hold exactly `channel_count` samples.
    pub fn push(&self, values: &[Vec3]) -> Result<u64> {
        if values.len() != self.channel_count {
            return Err(SyncError::Runtime(format!(
                "push expected {} channels, got {}",
                self.channel_count,
                values.len()
            )));
        }
        let mut state = self.state.write();
        let range = self.slot_range(state.head);
        state.samples[range].copy_from_slice(values);
        let written = state.head;
        state.head += 1;
        Ok(written)
    }

    /// Read-only view of slot `index`.
    ///
    /// Only this one slot is guaranteed consistent. Readers that need two
    /// adjacent slots from the same instant must use [`read_pair`](Self::read_pair).
    /// Data is only meaningful while `head - index < capacity`.
    pub fn read(&self, index: u64) -> MappedRwLockReadGuard<'_, [Vec3]> {
        let range = self.slot_range(index);
        RwLockReadGuard::map(self.state.read(), |state| &state.samples[range])
    }

    /// Slots `index` and `index + 1`, read under one lock acquisition.
    pub fn read_pair(&self, index: u64) -> SlotPair<'_> {
        let state = self.state.read();
        let head = state.head;
        SlotPair {
            state,
            first: self.slot_range(index),
            second: self.slot_range(index.wrapping_add(1)),
            head,
        }
    }

    /// Every slot under one read lock. Writers block until the view is dropped.
    pub fn view(&self) -> RingView<'_> {
        RingView {
            buffer: self,
            state: self.state.read(),
        }
    }
}

/// Whole-buffer snapshot held under a single read lock.
pub struct RingView<'a> {
    buffer: &'a GazeRingBuffer,
    state: RwLockReadGuard<'a, RingState>,
}

impl RingView<'_> {
    pub fn head(&self) -> u64 {
        self.state.head
    }

    /// Oldest slot not yet overwritten.
    pub fn oldest(&self) -> u64 {
        self.state.head.saturating_sub(self.buffer.capacity())
    }

    pub fn slot(&self, index: u64) -> &[Vec3] {
        &self.state.samples[self.buffer.slot_range(index)]
    }

    /// One channel at slots `index` and `index + 1`.
    pub fn channel_pair(&self, index: u64, channel: usize) -> Option<(Vec3, Vec3)> {
        let first = *self.slot(index).get(channel)?;
        let second = *self.slot(index.wrapping_add(1)).get(channel)?;
        Some((first, second))
    }
}

/// Two adjacent slots held under a single read lock.
///
/// The lock is released when the pair is dropped.
pub struct SlotPair<'a> {
    state: RwLockReadGuard<'a, RingState>,
    first: std::ops::Range<usize>,
    second: std::ops::Range<usize>,
    head: u64,
}

impl SlotPair<'_> {
    pub fn first(&self) -> &[Vec3] {
        &self.state.samples[self.first.clone()]
    }

    pub fn second(&self) -> &[Vec3] {
        &self.state.samples[self.second.clone()]
    }

    /// Buffer head at the moment the pair was read.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Both samples of one channel.
    pub fn channel(&self, channel: usize) -> Option<(Vec3, Vec3)> {
        Some((*self.first().get(channel)?, *self.second().get(channel)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sample(v: f32) -> Vec3 {
        Vec3::new(v, -v, 1.0)
    }

    #[test]
    fn test_rejects_capacity_at_ceiling() {
        assert!(matches!(
            GazeRingBuffer::new(20, 1),
            Err(SyncError::CapacityOutOfRange { bits: 20 })
        ));
        assert!(GazeRingBuffer::new(19, 1).is_ok());
    }

    #[test]
    fn test_push_advances_head_once_per_slot() {
        for bits in [1u32, 3, 6] {
            let buffer = GazeRingBuffer::new(bits, 2).unwrap();
            let n = buffer.capacity();
            for i in 0..n {
                buffer.push(&[sample(i as f32), sample(i as f32 + 0.5)]).unwrap();
            }
            assert_eq!(buffer.head(), n);
            let last = buffer.read(n - 1);
            assert_eq!(&*last, &[sample((n - 1) as f32), sample((n - 1) as f32 + 0.5)]);
        }
    }

    #[test]
    fn test_push_rejects_wrong_channel_count() {
        let buffer = GazeRingBuffer::new(4, 2).unwrap();
        assert!(buffer.push(&[sample(1.0)]).is_err());
        assert_eq!(buffer.head(), 0);
    }

    #[test]
    fn test_set_head_then_push_writes_absolute_slot() {
        let buffer = GazeRingBuffer::new(4, 1).unwrap();
        buffer.set_head(100);
        assert_eq!(buffer.push(&[sample(7.0)]).unwrap(), 100);
        assert_eq!(buffer.head(), 101);
        assert_eq!(buffer.read(100)[0], sample(7.0));
        // 100 mod 16 == 4
        assert_eq!(buffer.read(4)[0], sample(7.0));
    }

    #[test]
    fn test_read_pair_returns_adjacent_slots() {
        let buffer = GazeRingBuffer::new(3, 1).unwrap();
        for i in 0..8 {
            buffer.push(&[sample(i as f32)]).unwrap();
        }
        let pair = buffer.read_pair(7);
        // slot 8 wraps onto slot 0
        assert_eq!(pair.channel(0), Some((sample(7.0), sample(0.0))));
        assert_eq!(pair.channel(1), None);
        assert_eq!(pair.head(), 8);
    }

    #[test]
    fn test_view_tracks_live_window() {
        let buffer = GazeRingBuffer::new(2, 2).unwrap();
        buffer.set_head(10);
        for i in 10..16 {
            buffer.push(&[sample(i as f32), sample(-(i as f32))]).unwrap();
        }
        let view = buffer.view();
        assert_eq!(view.head(), 16);
        assert_eq!(view.oldest(), 12);
        assert_eq!(view.slot(13), &[sample(13.0), sample(-13.0)]);
        assert_eq!(view.channel_pair(14, 1), Some((sample(-14.0), sample(-15.0))));
        assert_eq!(view.channel_pair(14, 2), None);
    }

    #[test]
    fn test_view_blocks_writer_until_dropped() {
        let buffer = Arc::new(GazeRingBuffer::new(3, 1).unwrap());
        let view = buffer.view();
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push(&[sample(1.0)]).unwrap())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(view.head(), 0);
        drop(view);
        assert_eq!(writer.join().unwrap(), 0);
        assert_eq!(buffer.head(), 1);
    }

    #[test]
    fn test_read_pair_never_torn() {
        let buffer = Arc::new(GazeRingBuffer::new(2, 3).unwrap());
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..20_000 {
                    let v = sample(i as f32);
                    buffer.push(&[v, v, v]).unwrap();
                }
            })
        };
        for _ in 0..20_000 {
            let pair = buffer.read_pair(1);
            let first = pair.first();
            assert!(first.iter().all(|s| *s == first[0]), "slot observed half written");
        }
        writer.join().unwrap();
    }
}
