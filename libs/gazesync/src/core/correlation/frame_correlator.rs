// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! FrameCorrelator - Pairs a resolved frame with the gaze interpolated at its
//! capture time.
//!
//! The two slots around the timestamp are read under one lock, blended by the
//! timestamp's fractional position and handed to the sink together with the
//! frame. Each frame's failure is its own: nothing here can stop the sampler
//! or other frames. The frame buffer returns to its pool when the
//! [`CaptureFrame`] is dropped, whatever the outcome.

use crate::core::Result;
use crate::core::buffers::GazeRingBuffer;
use crate::core::clocks::{QuantizedClock, Timestamp};
use crate::core::frames::{CaptureFrame, GazeEncoding, TrainingPair, TrainingPairSink};
use crate::core::math::Vec3;
use crate::core::timing::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Why a frame produced no training pair. Drops are logged, never surfaced as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Captured before the sampler's first slot.
    PredatesStart,
    /// The ring buffer has wrapped past the frame's slot.
    Overwritten,
    /// The slot after the frame's slot was still unsampled when the wait ran out.
    NotYetSampled,
    /// The frame names a channel the buffer does not have.
    UnknownChannel,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::PredatesStart => "predates_start",
            DropReason::Overwritten => "overwritten",
            DropReason::NotYetSampled => "not_yet_sampled",
            DropReason::UnknownChannel => "unknown_channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrelationOutcome {
    Submitted { timestamp: Timestamp, gaze: Vec3 },
    Dropped(DropReason),
    ResolverFailed,
    SinkFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    pub submitted: u64,
    pub dropped_predates_start: u64,
    pub dropped_overwritten: u64,
    pub dropped_not_yet_sampled: u64,
    pub dropped_unknown_channel: u64,
    pub resolver_failures: u64,
    pub sink_failures: u64,
}

impl CorrelationStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_predates_start
            + self.dropped_overwritten
            + self.dropped_not_yet_sampled
            + self.dropped_unknown_channel
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    predates_start: AtomicU64,
    overwritten: AtomicU64,
    not_yet_sampled: AtomicU64,
    unknown_channel: AtomicU64,
    resolver_failures: AtomicU64,
    sink_failures: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &CorrelationOutcome) {
        let counter = match outcome {
            CorrelationOutcome::Submitted { .. } => &self.submitted,
            CorrelationOutcome::Dropped(DropReason::PredatesStart) => &self.predates_start,
            CorrelationOutcome::Dropped(DropReason::Overwritten) => &self.overwritten,
            CorrelationOutcome::Dropped(DropReason::NotYetSampled) => &self.not_yet_sampled,
            CorrelationOutcome::Dropped(DropReason::UnknownChannel) => &self.unknown_channel,
            CorrelationOutcome::ResolverFailed => &self.resolver_failures,
            CorrelationOutcome::SinkFailed => &self.sink_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct FrameCorrelator {
    buffer: Arc<GazeRingBuffer>,
    quantized: QuantizedClock,
    start_slot: u64,
    encoding: GazeEncoding,
    sink: Arc<dyn TrainingPairSink>,
    pending_sample_wait: Duration,
    counters: Counters,
}

impl FrameCorrelator {
    /// `start_slot` is the first slot the pose sampler published.
    pub fn new(
        buffer: Arc<GazeRingBuffer>,
        quantized: QuantizedClock,
        start_slot: u64,
        encoding: GazeEncoding,
        sink: Arc<dyn TrainingPairSink>,
        pending_sample_wait: Duration,
    ) -> Self {
        Self {
            buffer,
            quantized,
            start_slot,
            encoding,
            sink,
            pending_sample_wait,
            counters: Counters::default(),
        }
    }

    pub fn start_slot(&self) -> u64 {
        self.start_slot
    }

    /// First timestamp with gaze history.
    pub fn start_timestamp(&self) -> Timestamp {
        self.quantized.slot_start(self.start_slot)
    }

    /// Gaze of `channel` at `timestamp`, blended between the two slots around it.
    pub fn gaze_at(&self, timestamp: Timestamp, channel: usize) -> std::result::Result<Vec3, DropReason> {
        let index = self.quantized.quantize(timestamp);
        if index < self.start_slot {
            return Err(DropReason::PredatesStart);
        }
        let pair = self.buffer.read_pair(index);
        let head = pair.head();
        if index + 1 >= head {
            return Err(DropReason::NotYetSampled);
        }
        if head - index > self.buffer.capacity() {
            return Err(DropReason::Overwritten);
        }
        let (a, b) = pair.channel(channel).ok_or(DropReason::UnknownChannel)?;
        Ok(a.lerp(b, self.quantized.fraction(timestamp)))
    }

    /// Like [`gaze_at`](Self::gaze_at), but waits up to the configured time
    /// for the sampler to fill the slot after `timestamp`.
    async fn wait_for_gaze(&self, timestamp: Timestamp, channel: usize) -> std::result::Result<Vec3, DropReason> {
        let deadline = Instant::now() + self.pending_sample_wait;
        let poll = self.quantized.slot_duration().max(Duration::from_micros(100));
        loop {
            match self.gaze_at(timestamp, channel) {
                Err(DropReason::NotYetSampled) if Instant::now() < deadline => {
                    tokio::time::sleep(poll).await;
                }
                result => return result,
            }
        }
    }

    /// Await the timestamp shared by every channel cut from one capture, then
    /// correlate each frame in turn.
    pub async fn process(
        &self,
        frames: Vec<CaptureFrame>,
        timestamp: BoxFuture<'static, Result<Timestamp>>,
    ) -> Vec<CorrelationOutcome> {
        let resolved = timestamp.await;
        let mut outcomes = Vec::with_capacity(frames.len());
        for frame in frames {
            outcomes.push(self.correlate_resolved(frame, &resolved).await);
        }
        outcomes
    }

    /// Correlate one frame. The frame buffer is released when this returns.
    pub async fn correlate(&self, frame: CaptureFrame, resolved: Result<Timestamp>) -> CorrelationOutcome {
        self.correlate_resolved(frame, &resolved).await
    }

    async fn correlate_resolved(&self, frame: CaptureFrame, resolved: &Result<Timestamp>) -> CorrelationOutcome {
        let channel = frame.channel;
        let outcome = match resolved {
            Ok(timestamp) => self.emit(&frame, *timestamp).await,
            Err(e) => {
                tracing::debug!(channel, late = frame.late_estimate, error = %e, "Frame timestamp unresolved");
                CorrelationOutcome::ResolverFailed
            }
        };
        self.counters.record(&outcome);
        outcome
    }

    async fn emit(&self, frame: &CaptureFrame, timestamp: Timestamp) -> CorrelationOutcome {
        let channel = frame.channel;
        let gaze = match self.wait_for_gaze(timestamp, channel).await {
            Ok(gaze) => gaze,
            Err(reason) => {
                tracing::debug!(
                    channel,
                    timestamp,
                    slot = self.quantized.quantize(timestamp),
                    reason = reason.as_str(),
                    "Dropping frame"
                );
                return CorrelationOutcome::Dropped(reason);
            }
        };

        let pair = TrainingPair {
            frame: &frame.buffer,
            frame_size: frame.size,
            channel,
            timestamp,
            gaze,
            encoded: self.encoding.encode(gaze),
        };
        match self.sink.submit(&pair) {
            Ok(()) => {
                tracing::trace!(channel, timestamp, "Training pair submitted");
                CorrelationOutcome::Submitted { timestamp, gaze }
            }
            Err(e) => {
                tracing::warn!(channel, timestamp, error = %e, "Training pair sink failed");
                CorrelationOutcome::SinkFailed
            }
        }
    }

    pub fn stats(&self) -> CorrelationStats {
        let c = &self.counters;
        CorrelationStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped_predates_start: c.predates_start.load(Ordering::Relaxed),
            dropped_overwritten: c.overwritten.load(Ordering::Relaxed),
            dropped_not_yet_sampled: c.not_yet_sampled.load(Ordering::Relaxed),
            dropped_unknown_channel: c.unknown_channel.load(Ordering::Relaxed),
            resolver_failures: c.resolver_failures.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
        }
    }
}
