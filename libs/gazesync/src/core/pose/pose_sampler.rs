// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! PoseSampler - Fills the gaze ring buffer at the quantized poll rate.
//!
//! Runs on its own named thread. Each iteration busy-polls the clock (yielding
//! between checks) until the slot at `head` has begun, queries the pose source
//! for that slot's first tick, and pushes one gaze vector per channel.

use super::PoseSource;
use crate::core::buffers::GazeRingBuffer;
use crate::core::cancellation::CancellationSignal;
use crate::core::clocks::{MonotonicClock, QuantizedClock, Timestamp};
use crate::core::math::{Pose, Vec3};
use crate::core::{Result, SyncError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// First slot the sampler will write, published once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerStart {
    pub slot: u64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub start_slot: u64,
    pub samples_pushed: u64,
}

pub struct PoseSampler {
    buffer: Arc<GazeRingBuffer>,
    quantized: QuantizedClock,
    clock: Arc<dyn MonotonicClock>,
    source: Box<dyn PoseSource>,
    focus_point: Vec3,
}

impl PoseSampler {
    pub fn new(
        buffer: Arc<GazeRingBuffer>,
        quantized: QuantizedClock,
        clock: Arc<dyn MonotonicClock>,
        source: Box<dyn PoseSource>,
        focus_point: Vec3,
    ) -> Self {
        Self {
            buffer,
            quantized,
            clock,
            source,
            focus_point,
        }
    }

    /// Sample until `cancel` fires or the pose source fails.
    ///
    /// `on_start` is invoked exactly once, before the first push, with the
    /// slot the buffer's history begins at.
    pub fn run(
        mut self,
        cancel: &CancellationSignal,
        on_start: impl FnOnce(SamplerStart),
    ) -> Result<SamplerStats> {
        let channel_count = self.buffer.channel_count();
        let mut views = vec![Pose::default(); channel_count];
        let mut gazes = vec![Vec3::ZERO; channel_count];

        let start_slot = self.quantized.quantize(self.clock.now_ticks());
        self.buffer.set_head(start_slot);
        let start = SamplerStart {
            slot: start_slot,
            timestamp: self.quantized.slot_start(start_slot),
        };
        tracing::info!(
            slot = start.slot,
            timestamp = start.timestamp,
            source = self.source.description(),
            "Pose sampler started"
        );
        on_start(start);

        let mut stats = SamplerStats {
            start_slot,
            samples_pushed: 0,
        };
        let mut next = start_slot;
        while !cancel.is_cancelled() {
            if self.quantized.quantize(self.clock.now_ticks()) < next {
                std::thread::yield_now();
                continue;
            }
            let timestamp = self.quantized.slot_start(next);
            let located = self
                .source
                .locate(timestamp, &mut views)
                .map_err(|e| match e {
                    SyncError::PoseQuery(_) => e,
                    other => SyncError::PoseQuery(other.to_string()),
                })?;
            if located == 0 {
                return Err(SyncError::PoseQuery(format!(
                    "pose source returned zero views at {}",
                    timestamp
                )));
            }
            if located < channel_count {
                return Err(SyncError::PoseQuery(format!(
                    "pose source located {} views, session has {} channels",
                    located, channel_count
                )));
            }
            for (gaze, view) in gazes.iter_mut().zip(&views) {
                *gaze = view.gaze_toward(self.focus_point);
            }
            next = self.buffer.push(&gazes)? + 1;
            stats.samples_pushed += 1;
        }

        tracing::info!(samples = stats.samples_pushed, "Pose sampler cancelled");
        Ok(stats)
    }

    /// Run on a dedicated thread.
    pub fn spawn(self, cancel: CancellationSignal) -> Result<PoseSamplerHandle> {
        let (start_tx, start_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name("pose-sampler".to_string())
            .spawn(move || {
                let result = self.run(&cancel, move |start| {
                    let _ = start_tx.send(start);
                });
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Pose sampler stopped");
                }
                let _ = done_tx.send(result);
            })
            .map_err(|e| SyncError::Runtime(format!("Failed to spawn pose sampler thread: {}", e)))?;

        Ok(PoseSamplerHandle {
            start_rx: Some(start_rx),
            done_rx: Some(done_rx),
            thread: Some(thread),
        })
    }
}

/// Handle to a sampler running on its own thread.
pub struct PoseSamplerHandle {
    start_rx: Option<oneshot::Receiver<SamplerStart>>,
    done_rx: Option<oneshot::Receiver<Result<SamplerStats>>>,
    thread: Option<JoinHandle<()>>,
}

impl PoseSamplerHandle {
    /// Wait for the start slot. Fails with the sampler's error if it stopped first.
    pub async fn started(&mut self) -> Result<SamplerStart> {
        let Some(rx) = self.start_rx.take() else {
            return Err(SyncError::Runtime("sampler start already taken".into()));
        };
        match rx.await {
            Ok(start) => Ok(start),
            Err(_) => match self.finished().await {
                Err(e) => Err(e),
                Ok(_) => Err(SyncError::Runtime(
                    "pose sampler stopped before publishing its start".into(),
                )),
            },
        }
    }

    /// Wait for the sampler to stop and take its outcome.
    ///
    /// Cancel-safe: dropping the future before it completes leaves the
    /// outcome in place for a later call.
    pub async fn finished(&mut self) -> Result<SamplerStats> {
        let Some(rx) = self.done_rx.as_mut() else {
            return Err(SyncError::Runtime("sampler outcome already taken".into()));
        };
        let outcome = rx.await;
        self.done_rx = None;
        outcome.map_err(|_| SyncError::Runtime("pose sampler thread exited without a result".into()))?
    }

    /// Join the sampler thread. Call after cancelling.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Pose sampler thread panicked");
            }
        }
    }
}

impl Drop for PoseSamplerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::warn!("Pose sampler handle dropped without join");
        }
    }
}
