// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod allocation_guard;
mod frame_pool;
mod gaze_ring_buffer;

pub use allocation_guard::{AllocationBudget, AllocationGuard, GuardMode};
pub use frame_pool::{FramePool, FramePoolConfig, FramePoolStats, PooledFrame};
pub use gaze_ring_buffer::{GazeRingBuffer, RingView, SlotPair, MAX_CAPACITY_BITS};
