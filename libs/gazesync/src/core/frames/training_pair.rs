// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::FrameSize;
use crate::core::Result;
use crate::core::clocks::Timestamp;
use crate::core::math::Vec3;

/// A frame paired with the gaze direction at its resolved capture time.
///
/// The frame is borrowed for the duration of [`TrainingPairSink::submit`];
/// the underlying buffer goes back to the frame pool once the call returns.
#[derive(Debug, Clone, Copy)]
pub struct TrainingPair<'a> {
    pub frame: &'a [u8],
    pub frame_size: FrameSize,
    pub channel: usize,
    pub timestamp: Timestamp,
    /// Linearly interpolated direction. Not renormalized.
    pub gaze: Vec3,
    /// `gaze` in the session's two-float encoding, if it faces forward.
    pub encoded: Option<[f32; 2]>,
}

impl TrainingPair<'_> {
    pub fn to_owned_pair(&self) -> OwnedTrainingPair {
        OwnedTrainingPair {
            frame: self.frame.to_vec(),
            frame_size: self.frame_size,
            channel: self.channel,
            timestamp: self.timestamp,
            gaze: self.gaze,
            encoded: self.encoded,
        }
    }
}

/// Owned copy of a [`TrainingPair`], for consumers that outlive the call.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedTrainingPair {
    pub frame: Vec<u8>,
    pub frame_size: FrameSize,
    pub channel: usize,
    pub timestamp: Timestamp,
    pub gaze: Vec3,
    pub encoded: Option<[f32; 2]>,
}

/// Downstream consumer of training pairs (dataset writer, trainer, ...).
pub trait TrainingPairSink: Send + Sync {
    fn submit(&self, pair: &TrainingPair<'_>) -> Result<()>;
}

/// Channel-backed sink. A dropped receiver turns submission into a no-op.
impl TrainingPairSink for crossbeam_channel::Sender<OwnedTrainingPair> {
    fn submit(&self, pair: &TrainingPair<'_>) -> Result<()> {
        if self.send(pair.to_owned_pair()).is_err() {
            tracing::trace!(channel = pair.channel, "Training pair consumer gone, discarding pair");
        }
        Ok(())
    }
}
