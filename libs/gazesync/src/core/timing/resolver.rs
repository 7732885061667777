// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::Result;
use crate::core::clocks::Timestamp;
use crate::core::frames::FrameSize;
use std::future::Future;
use std::pin::Pin;

/// Boxed future type for async trait methods (required for dyn compatibility).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces the pose-domain capture time of a frame.
///
/// Exactly one resolver is active per session. It keeps its history and
/// calibration for its whole lifetime and is shared by every video source.
///
/// # Call discipline
///
/// Frame content is analyzed inside `resolve` itself, in callback order, so
/// stateful strategies see frames in capture order even though the returned
/// futures may complete out of order. The future only waits for calibration
/// or history that is not available yet.
pub trait FrameTimestampResolver: Send + Sync {
    /// Resolve the capture timestamp of one Gray8 frame.
    ///
    /// `late_estimate` is when the video backend delivered the frame.
    /// Errors are scoped to this frame and never halt the session.
    #[must_use]
    fn resolve(
        &self,
        frame: &[u8],
        size: FrameSize,
        late_estimate: Timestamp,
    ) -> BoxFuture<'static, Result<Timestamp>>;

    /// Strategy name for logs and reports.
    fn name(&self) -> &'static str;
}

/// Snap `timestamp` onto the grid `anchor + k * interval`.
pub(crate) fn snap_to_interval(timestamp: Timestamp, anchor: Timestamp, interval: u64) -> Timestamp {
    if interval == 0 {
        return timestamp;
    }
    let offset = timestamp as i128 - anchor as i128;
    let interval = interval as i128;
    let steps = (offset + offset.signum() * interval / 2) / interval;
    (anchor as i128 + steps * interval).max(0) as Timestamp
}

/// Apply a signed latency to a delivery timestamp, clamped to the clock's range.
pub(crate) fn apply_lag(late_estimate: Timestamp, lag: i64) -> Timestamp {
    (late_estimate as i128 - lag as i128).clamp(0, u64::MAX as i128) as Timestamp
}
