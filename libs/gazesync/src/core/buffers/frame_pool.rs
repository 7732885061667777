// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! FramePool - Reusable fixed-size frame buffers for the video hot path.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

/// Configuration for the frame pool.
#[derive(Clone, Debug)]
pub struct FramePoolConfig {
    /// Size in bytes of every pooled buffer.
    pub frame_len: usize,
    /// Maximum number of idle buffers kept for reuse. Surplus releases are freed.
    pub max_retained: usize,
}

impl FramePoolConfig {
    pub const DEFAULT_MAX_RETAINED: usize = 64;

    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            max_retained: Self::DEFAULT_MAX_RETAINED,
        }
    }
}

/// Statistics about frame pool usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramePoolStats {
    pub frame_len: usize,
    /// Buffers ever allocated by the pool.
    pub allocations: u64,
    /// Idle buffers ready for reuse.
    pub retained: usize,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Released buffers freed because the pool was full.
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    id: u64,
    allocation_limit: u64,
}

#[derive(Default)]
struct ReservationState {
    active: Option<Reservation>,
    next_id: u64,
}

pub(crate) struct FramePoolInner {
    free: SegQueue<Vec<u8>>,
    frame_len: usize,
    max_retained: usize,
    retained: AtomicUsize,
    outstanding: AtomicUsize,
    allocations: AtomicU64,
    discarded: AtomicU64,
    reservation: Mutex<ReservationState>,
}

impl FramePoolInner {
    fn allocate(&self) -> Vec<u8> {
        let total = self.allocations.fetch_add(1, Ordering::AcqRel) + 1;
        let mut reservation = self.reservation.lock();
        if let Some(active) = reservation.active {
            if total > active.allocation_limit {
                reservation.active = None;
                tracing::warn!(
                    reservation = active.id,
                    allocations = total,
                    limit = active.allocation_limit,
                    "Frame allocation budget exceeded, revoking reservation"
                );
            }
        }
        vec![0; self.frame_len]
    }

    fn release(&self, buffer: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if buffer.len() != self.frame_len {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let retained = self.retained.fetch_add(1, Ordering::AcqRel);
        if retained >= self.max_retained {
            self.retained.fetch_sub(1, Ordering::AcqRel);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(max_retained = self.max_retained, "Frame pool full, freeing buffer");
            return;
        }
        self.free.push(buffer);
    }
}

/// Pool of fixed-size byte buffers. Clones share the same pool.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<FramePoolInner>,
}

impl FramePool {
    pub fn new(config: FramePoolConfig) -> Self {
        tracing::info!(
            frame_len = config.frame_len,
            max_retained = config.max_retained,
            "Creating frame pool"
        );
        Self {
            inner: Arc::new(FramePoolInner {
                free: SegQueue::new(),
                frame_len: config.frame_len,
                max_retained: config.max_retained,
                retained: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                allocations: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                reservation: Mutex::new(ReservationState::default()),
            }),
        }
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.inner.frame_len
    }

    /// Pop an idle buffer, or allocate one if none is idle. Never blocks.
    pub fn acquire(&self) -> PooledFrame {
        let buffer = match self.inner.free.pop() {
            Some(buffer) => {
                self.inner.retained.fetch_sub(1, Ordering::AcqRel);
                buffer
            }
            None => self.inner.allocate(),
        };
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledFrame {
            data: buffer,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Return a buffer to the pool. Equivalent to dropping it.
    pub fn release(&self, frame: PooledFrame) {
        drop(frame);
    }

    pub fn stats(&self) -> FramePoolStats {
        FramePoolStats {
            frame_len: self.inner.frame_len,
            allocations: self.inner.allocations.load(Ordering::Acquire),
            retained: self.inner.retained.load(Ordering::Acquire),
            outstanding: self.inner.outstanding.load(Ordering::Acquire),
            discarded: self.inner.discarded.load(Ordering::Acquire),
        }
    }

    /// Pre-allocate `prewarm` idle buffers, then cap further allocations at
    /// `additional_limit` while the reservation stays active.
    ///
    /// Returns `None` if another reservation is already active.
    pub(crate) fn begin_reservation(&self, prewarm: usize, additional_limit: u64) -> Option<u64> {
        let mut reservation = self.inner.reservation.lock();
        if reservation.active.is_some() {
            return None;
        }
        let idle = self.inner.retained.load(Ordering::Acquire);
        let target = prewarm.min(self.inner.max_retained);
        for _ in idle..target {
            self.inner.allocations.fetch_add(1, Ordering::AcqRel);
            self.inner.retained.fetch_add(1, Ordering::AcqRel);
            self.inner.free.push(vec![0; self.inner.frame_len]);
        }
        let id = reservation.next_id;
        reservation.next_id += 1;
        reservation.active = Some(Reservation {
            id,
            allocation_limit: self.inner.allocations.load(Ordering::Acquire) + additional_limit,
        });
        tracing::debug!(reservation = id, prewarm = target, additional_limit, "Began frame reservation");
        Some(id)
    }

    pub(crate) fn reservation_active(&self, id: u64) -> bool {
        matches!(self.inner.reservation.lock().active, Some(r) if r.id == id)
    }

    /// End reservation `id`. Returns false if it is no longer the active one.
    pub(crate) fn end_reservation(&self, id: u64) -> bool {
        let mut reservation = self.inner.reservation.lock();
        match reservation.active {
            Some(r) if r.id == id => {
                reservation.active = None;
                true
            }
            _ => false,
        }
    }

    /// Force-revoke whatever reservation is active. Returns whether one was.
    pub fn revoke_reservation(&self) -> bool {
        self.inner.reservation.lock().active.take().is_some()
    }
}

/// Handle to a pooled frame buffer. Returns the buffer to its pool on Drop.
pub struct PooledFrame {
    data: Vec<u8>,
    pool: Arc<FramePoolInner>,
}

impl PooledFrame {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for PooledFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.data));
    }
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("len", &self.as_slice().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = FramePool::new(FramePoolConfig::new(64));
        let frame = pool.acquire();
        assert_eq!(frame.len(), 64);
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.retained, 0);
    }

    #[test]
    fn test_release_then_acquire_reuses_buffer() {
        let pool = FramePool::new(FramePoolConfig::new(128));
        let mut frame = pool.acquire();
        frame[0] = 42;
        pool.release(frame);
        assert_eq!(pool.stats().retained, 1);

        let reused = pool.acquire();
        assert_eq!(reused.len(), 128);
        assert_eq!(reused[0], 42, "buffers are reused as-is, not cleared");
        assert_eq!(pool.stats().allocations, 1);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = FramePool::new(FramePoolConfig {
            frame_len: 16,
            max_retained: 2,
        });
        let frames: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(frames);
        let stats = pool.stats();
        assert_eq!(stats.retained, 2);
        assert_eq!(stats.discarded, 3);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_reservation_revoked_when_limit_exceeded() {
        let pool = FramePool::new(FramePoolConfig::new(8));
        let id = pool.begin_reservation(2, 1).unwrap();
        assert_eq!(pool.stats().retained, 2);
        assert!(pool.begin_reservation(1, 1).is_none());

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        assert!(pool.reservation_active(id));
        let d = pool.acquire();
        assert!(!pool.reservation_active(id));
        assert!(!pool.end_reservation(id));
        drop((a, b, c, d));
    }

    #[test]
    fn test_end_reservation() {
        let pool = FramePool::new(FramePoolConfig::new(8));
        let id = pool.begin_reservation(0, 10).unwrap();
        assert!(pool.end_reservation(id));
        assert!(!pool.revoke_reservation());
        assert!(pool.begin_reservation(0, 10).is_some());
        assert!(pool.revoke_reservation());
    }
}
