// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod main_thread_bridge;

pub use main_thread_bridge::MainThreadBridge;
