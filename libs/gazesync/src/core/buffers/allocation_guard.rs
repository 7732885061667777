// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scoped allocation budget for latency-critical capture windows.
//!
//! There is no collector to pause here; the property worth guarding is that
//! the frame hot path stops allocating. Acquiring a guard pre-allocates the
//! soft budget as idle pool buffers and caps any further frame allocations
//! at the hard budget. Allocating past the cap revokes the reservation, which
//! only costs data quality, never correctness.

use super::FramePool;
use crate::core::{Result, SyncError};
use serde::{Deserialize, Serialize};

/// What to do when the reservation cannot be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Fail the session.
    Strict,
    /// Log a warning and continue without the reservation.
    #[default]
    Relaxed,
}

/// Soft/hard byte budgets for a guarded region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationBudget {
    /// Bytes pre-allocated up front.
    pub soft_bytes: usize,
    /// Upper bound on bytes allocated while the guard is active.
    pub hard_bytes: usize,
}

impl Default for AllocationBudget {
    fn default() -> Self {
        Self {
            soft_bytes: 1024 * 1024,
            hard_bytes: 1024 * 1024 + 1024 * 128,
        }
    }
}

pub struct AllocationGuard {
    pool: FramePool,
    reservation: Option<u64>,
}

impl AllocationGuard {
    pub fn acquire(pool: &FramePool, budget: AllocationBudget, mode: GuardMode) -> Result<Self> {
        let reservation = Self::try_reserve(pool, budget);
        match (&reservation, mode) {
            (Err(reason), GuardMode::Strict) => {
                return Err(SyncError::AllocationGuardDenied(reason.clone()));
            }
            (Err(reason), GuardMode::Relaxed) => {
                tracing::warn!(%reason, "Could not reserve frame allocations; data quality may suffer");
            }
            (Ok(id), _) => {
                tracing::debug!(reservation = id, ?budget, "Allocation guard active");
            }
        }
        Ok(Self {
            pool: pool.clone(),
            reservation: reservation.ok(),
        })
    }

    fn try_reserve(pool: &FramePool, budget: AllocationBudget) -> std::result::Result<u64, String> {
        let frame_len = pool.frame_len().max(1);
        if budget.soft_bytes > budget.hard_bytes {
            return Err(format!(
                "soft budget {} exceeds hard budget {}",
                budget.soft_bytes, budget.hard_bytes
            ));
        }
        if budget.hard_bytes < frame_len {
            return Err(format!(
                "hard budget {} is smaller than one {}-byte frame",
                budget.hard_bytes, frame_len
            ));
        }
        let prewarm = budget.soft_bytes / frame_len;
        let additional = ((budget.hard_bytes - prewarm * frame_len) / frame_len) as u64;
        pool.begin_reservation(prewarm, additional)
            .ok_or_else(|| "another allocation reservation is already active".to_string())
    }

    /// Whether the reservation was obtained and has not been revoked.
    pub fn is_active(&self) -> bool {
        self.reservation
            .is_some_and(|id| self.pool.reservation_active(id))
    }

    /// Whether the reservation was obtained at all.
    pub fn was_granted(&self) -> bool {
        self.reservation.is_some()
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        let Some(id) = self.reservation.take() else {
            return;
        };
        if !self.pool.end_reservation(id) {
            tracing::warn!(reservation = id, "Allocation reservation revoked prematurely");
        }
    }
}
