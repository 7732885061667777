// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Timing unavailable: {0}")]
    TimingUnavailable(String),

    #[error("Pose query failed: {0}")]
    PoseQuery(String),

    #[error("Allocation guard denied: {0}")]
    AllocationGuardDenied(String),

    #[error("Ring buffer capacity out of range: {bits} bits (must be below 20)")]
    CapacityOutOfRange { bits: u32 },

    #[error("Frame timestamp calibration failed: {0}")]
    Calibration(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether this error must halt the whole calibration session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::AllocationGuardDenied(_) | SyncError::Calibration(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
