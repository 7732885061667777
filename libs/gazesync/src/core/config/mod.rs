// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Session configuration.

mod session_config;

pub use session_config::{AllocationGuardConfig, ChannelConfig, FramePoolSettings, SessionConfig};
