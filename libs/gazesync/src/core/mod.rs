// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod buffers;
pub mod cancellation;
pub mod clocks;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod frames;
pub mod logging;
pub mod math;
pub mod pose;
pub mod session;
pub mod timing;
pub mod video;

pub use buffers::{
    AllocationBudget, AllocationGuard, FramePool, FramePoolConfig, FramePoolStats, GazeRingBuffer,
    GuardMode, PooledFrame,
};
pub use cancellation::CancellationSignal;
pub use clocks::{ManualClock, MonotonicClock, QuantizedClock, SystemClock, Timestamp};
pub use config::{ChannelConfig, SessionConfig};
pub use correlation::{CorrelationOutcome, CorrelationStats, DropReason, FrameCorrelator};
pub use dispatch::MainThreadBridge;
pub use error::{Result, SyncError};
pub use frames::{CaptureFrame, FrameSize, GazeEncoding, OwnedTrainingPair, TrainingPair, TrainingPairSink};
pub use logging::init_logging;
pub use math::{Pose, Quat, Transform2D, Vec3};
pub use pose::{PoseSampler, PoseSource};
pub use session::{CalibrationSession, SessionCollaborators, SessionReport};
pub use timing::{FrameTimestampResolver, FrameTimestampStrategy, RoundtripDisplay};
pub use video::{
    CropRect, Framerate, HandlerRegistry, Subscription, VideoFormat, VideoFrameHandler, VideoMode,
    VideoSource,
};
