// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod display_roundtrip;
mod fixed_latency;
mod optical_flow;
mod resolver;
mod strategy;

pub use display_roundtrip::{DisplayRoundtrip, DisplayRoundtripConfig, RoundtripDisplay};
pub use fixed_latency::FixedLatency;
pub use optical_flow::{OpticalFlowConfig, OpticalFlowCorrelation};
pub use resolver::{BoxFuture, FrameTimestampResolver};
pub use strategy::{FrameTimestampStrategy, ResolverContext};
