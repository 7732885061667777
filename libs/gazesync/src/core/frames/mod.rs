// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod capture_frame;
mod gaze_vector;
mod training_pair;

pub use capture_frame::{CaptureFrame, FrameSize};
pub use gaze_vector::GazeEncoding;
pub use training_pair::{OwnedTrainingPair, TrainingPair, TrainingPairSink};
