// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::Result;
use crate::core::clocks::Timestamp;
use crate::core::math::Pose;

/// External head/eye pose provider (an XR runtime's view locator, a recorded
/// trace, a simulator).
///
/// Owned by the pose sampler's thread for the lifetime of a session.
pub trait PoseSource: Send {
    /// Locate every tracked view at `timestamp`, writing into `views`.
    ///
    /// Returns how many entries of `views` were filled. An error, or zero
    /// located views, is fatal to the session.
    fn locate(&mut self, timestamp: Timestamp, views: &mut [Pose]) -> Result<usize>;

    /// Whether timestamps of the session clock can be converted into the
    /// pose runtime's own time domain.
    fn supports_time_conversion(&self) -> bool {
        true
    }

    fn description(&self) -> &str;
}
