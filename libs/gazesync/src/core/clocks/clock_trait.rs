// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock trait - Passive tick source shared by the pose and camera domains.

/// Integer tick count in a single monotonic clock domain.
pub type Timestamp = u64;

/// Passive monotonic clock.
///
/// Both the pose sampler and the camera callbacks express time in the ticks
/// of one `MonotonicClock`, so frame timestamps and pose samples can be
/// compared directly.
///
/// ## Implementations
///
/// - `SystemClock`: process-relative `Instant`, nanosecond ticks
/// - `ManualClock`: caller-driven ticks for deterministic replay and tests
pub trait MonotonicClock: Send + Sync {
    /// Current tick count. Never decreases.
    fn now_ticks(&self) -> Timestamp;

    /// Ticks per second, or `None` if the host cannot report it.
    fn frequency(&self) -> Option<u64>;

    /// Human-readable clock description, used in logs.
    fn description(&self) -> &str;
}
