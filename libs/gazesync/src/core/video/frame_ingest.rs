// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! FrameIngest - Per-source video handler feeding the correlator.
//!
//! One ingest is registered per physical source and serves every channel
//! mapped to it. On the backend's callback thread it cuts each channel's
//! region out of the raw frame into a pooled Gray8 buffer and runs the
//! resolver's frame analysis. Waiting for the timestamp and correlating
//! happen on a spawned task, so the callback never blocks.

use super::{CropRect, VideoFrameHandler, VideoMode, resample_luma};
use crate::core::buffers::FramePool;
use crate::core::cancellation::CancellationSignal;
use crate::core::clocks::Timestamp;
use crate::core::correlation::FrameCorrelator;
use crate::core::frames::{CaptureFrame, FrameSize};
use crate::core::math::Transform2D;
use crate::core::timing::FrameTimestampResolver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::runtime::Handle;

/// How one gaze channel is cut from its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInput {
    pub channel: usize,
    /// Full frame when `None`.
    pub crop: Option<CropRect>,
    pub transform: Transform2D,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames_received: u64,
    pub frames_dispatched: u64,
    pub frames_before_start: u64,
    pub frames_compressed: u64,
    pub resample_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dispatched: AtomicU64,
    before_start: AtomicU64,
    compressed: AtomicU64,
    resample_failures: AtomicU64,
}

pub struct FrameIngest {
    source: String,
    channels: Vec<ChannelInput>,
    mode: Mutex<VideoMode>,
    input_size: FrameSize,
    start_timestamp: Timestamp,
    pool: FramePool,
    resolver: Arc<dyn FrameTimestampResolver>,
    correlator: Arc<FrameCorrelator>,
    cancel: CancellationSignal,
    runtime: Handle,
    warned_compressed: AtomicBool,
    counters: Counters,
}

impl FrameIngest {
    pub fn new(
        source: impl Into<String>,
        channels: Vec<ChannelInput>,
        initial_mode: VideoMode,
        input_size: FrameSize,
        pool: FramePool,
        resolver: Arc<dyn FrameTimestampResolver>,
        correlator: Arc<FrameCorrelator>,
        cancel: CancellationSignal,
        runtime: Handle,
    ) -> Self {
        let start_timestamp = correlator.start_timestamp();
        Self {
            source: source.into(),
            channels,
            mode: Mutex::new(initial_mode),
            input_size,
            start_timestamp,
            pool,
            resolver,
            correlator,
            cancel,
            runtime,
            warned_compressed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stats(&self) -> IngestStats {
        let c = &self.counters;
        IngestStats {
            frames_received: c.received.load(Ordering::Relaxed),
            frames_dispatched: c.dispatched.load(Ordering::Relaxed),
            frames_before_start: c.before_start.load(Ordering::Relaxed),
            frames_compressed: c.compressed.load(Ordering::Relaxed),
            resample_failures: c.resample_failures.load(Ordering::Relaxed),
        }
    }
}

impl VideoFrameHandler for FrameIngest {
    fn on_mode(&self, mode: VideoMode) {
        tracing::debug!(
            source = %self.source,
            format = ?mode.format,
            width = mode.size.width,
            height = mode.size.height,
            "Video mode changed"
        );
        *self.mode.lock() = mode;
    }

    fn on_frame(&self, data: &[u8], late_estimate: Timestamp) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if late_estimate < self.start_timestamp {
            self.counters.before_start.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(source = %self.source, late_estimate, "Frame predates gaze history");
            return;
        }

        let mode = *self.mode.lock();
        if mode.format.is_compressed() {
            self.counters.compressed.fetch_add(1, Ordering::Relaxed);
            if !self.warned_compressed.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    source = %self.source,
                    format = ?mode.format,
                    "Compressed video needs an external decoder, dropping frames"
                );
            }
            return;
        }

        let mut frames = Vec::with_capacity(self.channels.len());
        for input in &self.channels {
            let mut buffer = self.pool.acquire();
            let crop = input.crop.unwrap_or(CropRect::full(mode.size));
            if !resample_luma(data, &mode, &crop, &input.transform, &mut buffer, self.input_size) {
                self.counters.resample_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(source = %self.source, channel = input.channel, format = ?mode.format, "Resample failed");
                self.pool.release(buffer);
                continue;
            }
            frames.push(CaptureFrame {
                buffer,
                size: self.input_size,
                channel: input.channel,
                late_estimate,
            });
        }
        let Some(first) = frames.first() else {
            return;
        };

        let timestamp = self.resolver.resolve(&first.buffer, self.input_size, late_estimate);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let correlator = Arc::clone(&self.correlator);
        self.runtime.spawn(async move {
            correlator.process(frames, timestamp).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffers::{FramePoolConfig, GazeRingBuffer};
    use crate::core::clocks::QuantizedClock;
    use crate::core::frames::{GazeEncoding, OwnedTrainingPair};
    use crate::core::math::Vec3;
    use crate::core::timing::FixedLatency;
    use crate::core::video::{Framerate, VideoFormat};
    use std::time::Duration;

    struct Fixture {
        quantized: QuantizedClock,
        pool: FramePool,
        rx: crossbeam_channel::Receiver<OwnedTrainingPair>,
        cancel: CancellationSignal,
        ingest: FrameIngest,
    }

    fn gray_mode() -> VideoMode {
        VideoMode {
            format: VideoFormat::Gray8,
            size: FrameSize::new(8, 4),
            framerate: Framerate::new(30, 1),
        }
    }

    fn fixture() -> Fixture {
        let quantized = QuantizedClock::new(1_000_000_000, 1536, 4000).unwrap();
        let buffer = Arc::new(GazeRingBuffer::new(quantized.capacity_bits(), 2).unwrap());
        buffer.set_head(100);
        for slot in 100..110 {
            let v = slot as f32;
            buffer
                .push(&[Vec3::new(v, 0.0, 1.0), Vec3::new(-v, 0.0, 1.0)])
                .unwrap();
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let correlator = Arc::new(FrameCorrelator::new(
            buffer,
            quantized,
            100,
            GazeEncoding::Planar,
            Arc::new(tx),
            Duration::ZERO,
        ));
        let input_size = FrameSize::new(4, 4);
        let pool = FramePool::new(FramePoolConfig::new(input_size.gray8_len()));
        let cancel = CancellationSignal::new();
        let left = CropRect {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        let right = CropRect { x: 4, ..left };
        let ingest = FrameIngest::new(
            "stereo",
            vec![
                ChannelInput {
                    channel: 0,
                    crop: Some(left),
                    transform: Transform2D::IDENTITY,
                },
                ChannelInput {
                    channel: 1,
                    crop: Some(right),
                    transform: Transform2D::MIRROR_X,
                },
            ],
            gray_mode(),
            input_size,
            pool.clone(),
            Arc::new(FixedLatency::new(0)),
            correlator,
            cancel.clone(),
            Handle::current(),
        );
        Fixture {
            quantized,
            pool,
            rx,
            cancel,
            ingest,
        }
    }

    async fn recv(rx: &crossbeam_channel::Receiver<OwnedTrainingPair>) -> OwnedTrainingPair {
        for _ in 0..500 {
            if let Ok(pair) = rx.try_recv() {
                return pair;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no training pair arrived");
    }

    #[tokio::test]
    async fn test_stereo_frame_feeds_both_channels() {
        let f = fixture();
        let frame: Vec<u8> = (0..32).collect();
        let t = f.quantized.slot_start(104) + (1 << 19);
        f.ingest.on_frame(&frame, t);

        let mut pairs = vec![recv(&f.rx).await, recv(&f.rx).await];
        pairs.sort_by_key(|p| p.channel);
        assert_eq!(pairs[0].gaze, Vec3::new(104.5, 0.0, 1.0));
        assert_eq!(pairs[1].gaze, Vec3::new(-104.5, 0.0, 1.0));
        // left half as-is, right half mirrored
        assert_eq!(&pairs[0].frame[..4], &[0, 1, 2, 3]);
        assert_eq!(&pairs[1].frame[..4], &[7, 6, 5, 4]);
        assert_eq!(f.ingest.stats().frames_dispatched, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_frames_before_start_are_ignored() {
        let f = fixture();
        f.ingest.on_frame(&[0; 32], f.quantized.slot_start(99));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.ingest.stats().frames_before_start, 1);
        assert_eq!(f.pool.stats().allocations, 0);
    }

    #[tokio::test]
    async fn test_compressed_and_cancelled_frames_are_dropped() {
        let f = fixture();
        f.ingest.on_mode(VideoMode {
            format: VideoFormat::Mjpeg,
            ..gray_mode()
        });
        f.ingest.on_frame(&[0; 32], f.quantized.slot_start(104));
        f.ingest.on_frame(&[0; 32], f.quantized.slot_start(105));
        assert_eq!(f.ingest.stats().frames_compressed, 2);

        f.ingest.on_mode(gray_mode());
        f.cancel.cancel();
        f.ingest.on_frame(&[0; 32], f.quantized.slot_start(104));
        assert_eq!(f.ingest.stats().frames_received, 2);
        assert_eq!(f.ingest.stats().frames_dispatched, 0);
    }

    #[tokio::test]
    async fn test_short_frame_returns_buffers() {
        let f = fixture();
        f.ingest.on_frame(&[0; 8], f.quantized.slot_start(104));
        assert_eq!(f.ingest.stats().resample_failures, 2);
        assert_eq!(f.pool.stats().outstanding, 0);
        assert_eq!(f.pool.stats().retained, 1);
    }
}
