// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod calibration_session;

pub use calibration_session::{CalibrationSession, SessionCollaborators, SessionReport};
