// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod pose_sampler;
mod pose_source;

pub use pose_sampler::{PoseSampler, PoseSamplerHandle, SamplerStart, SamplerStats};
pub use pose_source::PoseSource;
