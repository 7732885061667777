// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod clock_trait;
mod manual_clock;
mod quantized_clock;
mod system_clock;

pub use clock_trait::{MonotonicClock, Timestamp};
pub use manual_clock::ManualClock;
pub use quantized_clock::QuantizedClock;
pub use system_clock::SystemClock;
