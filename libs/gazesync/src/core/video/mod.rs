// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod frame_ingest;
mod resample;
mod video_source;

pub use frame_ingest::{ChannelInput, FrameIngest, IngestStats};
pub use resample::resample_luma;
pub use video_source::{
    CropRect, Framerate, HandlerRegistry, Subscription, VideoFormat, VideoFrameHandler, VideoMode,
    VideoSource,
};
