// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Gaze/video timestamp synchronization for eye-tracking calibration.
//!
//! A pose sampler fills a ring buffer of gaze directions on a quantized
//! clock; camera frames are timestamped by a pluggable resolver and paired
//! with the gaze interpolated at that instant.

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::too_many_arguments)] // Session wiring passes many shared handles
#![allow(clippy::type_complexity)] // Complex types are clear in context
#![allow(clippy::manual_clamp)] // Manual clamp is sometimes clearer

pub mod core;

pub use crate::core::{
    CalibrationSession, CancellationSignal, ChannelConfig, FrameSize, FrameTimestampStrategy,
    GazeEncoding, MainThreadBridge, ManualClock, MonotonicClock, OwnedTrainingPair, PoseSource,
    Result, SessionCollaborators, SessionConfig, SessionReport, SyncError, SystemClock,
    TrainingPairSink, VideoSource, init_logging,
};
