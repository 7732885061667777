// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::buffers::PooledFrame;
use crate::core::clocks::Timestamp;
use serde::{Deserialize, Serialize};

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes of one 8-bit single-plane image of this size.
    #[inline]
    pub fn gray8_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

/// A resampled camera frame bound for one gaze channel.
///
/// `late_estimate` is when the backend enqueued the frame, not necessarily
/// when the sensor exposed it.
#[derive(Debug)]
pub struct CaptureFrame {
    pub buffer: PooledFrame,
    pub size: FrameSize,
    pub channel: usize,
    pub late_estimate: Timestamp,
}
