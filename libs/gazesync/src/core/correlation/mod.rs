// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod frame_correlator;

pub use frame_correlator::{CorrelationOutcome, CorrelationStats, DropReason, FrameCorrelator};
