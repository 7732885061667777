// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! CalibrationSession - Wires the sampler, resolver and video ingest together.
//!
//! Setup errors and pose failures end the session. Everything the session
//! spawned is torn down before `run` returns: the sampler is cancelled and
//! joined, video handlers are unregistered and the host bridge is shut down.

use crate::core::buffers::{AllocationGuard, FramePool, GazeRingBuffer};
use crate::core::cancellation::CancellationSignal;
use crate::core::clocks::{MonotonicClock, QuantizedClock};
use crate::core::config::SessionConfig;
use crate::core::correlation::{CorrelationStats, FrameCorrelator};
use crate::core::dispatch::MainThreadBridge;
use crate::core::frames::TrainingPairSink;
use crate::core::pose::{PoseSampler, PoseSource};
use crate::core::timing::{ResolverContext, RoundtripDisplay};
use crate::core::video::{FrameIngest, IngestStats, VideoFrameHandler, VideoSource};
use crate::core::{Result, SyncError};
use std::sync::Arc;
use tokio::runtime::Handle;

/// External systems a session drives.
pub struct SessionCollaborators {
    /// Clock shared by the pose runtime and the capture backend.
    pub clock: Arc<dyn MonotonicClock>,
    pub pose_source: Box<dyn PoseSource>,
    /// Indexed by `ChannelConfig::source`.
    pub video_sources: Vec<Arc<dyn VideoSource>>,
    pub sink: Arc<dyn TrainingPairSink>,
    /// Required by the display roundtrip strategy.
    pub display: Option<Arc<dyn RoundtripDisplay>>,
    /// Shut down on teardown so no caller stays blocked on the host thread.
    pub bridge: Option<Arc<MainThreadBridge>>,
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub start_slot: u64,
    pub samples_pushed: u64,
    pub resolver: &'static str,
    pub correlation: CorrelationStats,
    /// One entry per video source with at least one channel.
    pub ingest: Vec<IngestStats>,
    /// Whether the allocation reservation survived the whole session.
    pub allocation_guard_held: bool,
}

impl SessionReport {
    pub fn pairs_submitted(&self) -> u64 {
        self.correlation.submitted
    }

    pub fn frames_before_start(&self) -> u64 {
        self.ingest.iter().map(|s| s.frames_before_start).sum()
    }
}

pub struct CalibrationSession {
    config: SessionConfig,
    collaborators: SessionCollaborators,
}

impl CalibrationSession {
    pub fn new(config: SessionConfig, collaborators: SessionCollaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Run until `cancel` fires or the pose source fails.
    ///
    /// Must be called from within a tokio runtime; correlation tasks are
    /// spawned onto it.
    pub async fn run(self, cancel: CancellationSignal) -> Result<SessionReport> {
        let Self {
            config,
            collaborators,
        } = self;
        let SessionCollaborators {
            clock,
            pose_source,
            video_sources,
            sink,
            display,
            bridge,
        } = collaborators;

        config.validate()?;
        config.check_sources(video_sources.len())?;
        if !pose_source.supports_time_conversion() {
            return Err(SyncError::TimingUnavailable(format!(
                "pose source '{}' cannot convert clock '{}' timestamps",
                pose_source.description(),
                clock.description()
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Runtime(format!("No tokio runtime for session: {}", e)))?;

        let quantized = QuantizedClock::from_clock(
            clock.as_ref(),
            config.max_poll_rate_hz,
            config.max_latency_window_ms,
        )?;
        let buffer = Arc::new(GazeRingBuffer::new(
            quantized.capacity_bits(),
            config.channel_count(),
        )?);
        let pool = FramePool::new(config.frame_pool_config());
        let frame_interval = video_sources
            .first()
            .and_then(|source| source.current_mode().framerate.frame_interval(quantized.frequency()));
        let resolver = config.frame_timestamp_strategy.build(ResolverContext {
            quantized,
            buffer: Arc::clone(&buffer),
            display,
            frame_interval,
        })?;
        let guard = AllocationGuard::acquire(
            &pool,
            config.allocation_guard.budget(),
            config.allocation_guard.mode,
        )?;

        tracing::info!(
            channels = config.channel_count(),
            sources = video_sources.len(),
            strategy = resolver.name(),
            shift = quantized.shift(),
            capacity = quantized.capacity(),
            "Starting calibration session"
        );

        let mut sampler = PoseSampler::new(
            Arc::clone(&buffer),
            quantized,
            clock,
            pose_source,
            config.focus_point,
        )
        .spawn(cancel.clone())?;

        let start = match sampler.started().await {
            Ok(start) => start,
            Err(e) => {
                cancel.cancel();
                sampler.join();
                if let Some(bridge) = &bridge {
                    bridge.shutdown();
                }
                return Err(e);
            }
        };

        let correlator = Arc::new(FrameCorrelator::new(
            Arc::clone(&buffer),
            quantized,
            start.slot,
            config.gaze_encoding,
            sink,
            config.pending_sample_wait(),
        ));

        let mut ingests = Vec::with_capacity(video_sources.len());
        let mut subscriptions = Vec::with_capacity(video_sources.len());
        let mut attach_error = None;
        for (index, source) in video_sources.iter().enumerate() {
            let channels = config.channel_inputs(index);
            if channels.is_empty() {
                tracing::debug!(source = source.description(), "Video source feeds no channel");
                continue;
            }
            let ingest = Arc::new(FrameIngest::new(
                source.description(),
                channels,
                source.current_mode(),
                config.input_size,
                pool.clone(),
                Arc::clone(&resolver),
                Arc::clone(&correlator),
                cancel.clone(),
                runtime.clone(),
            ));
            match source.subscribe(Arc::clone(&ingest) as Arc<dyn VideoFrameHandler>) {
                Ok(subscription) => {
                    subscriptions.push(subscription);
                    ingests.push(ingest);
                }
                Err(e) => {
                    tracing::error!(source = source.description(), error = %e, "Failed to subscribe to video source");
                    attach_error = Some(e);
                    break;
                }
            }
        }

        let waited = match attach_error {
            Some(e) => Err(e),
            None => tokio::select! {
                _ = cancel.cancelled() => Ok(None),
                result = sampler.finished() => result.map(Some),
            },
        };

        cancel.cancel();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        let sampled = match waited {
            Ok(Some(stats)) => Ok(stats),
            Ok(None) => sampler.finished().await,
            Err(e) => {
                // Already taken if the sampler itself failed.
                let _ = sampler.finished().await;
                Err(e)
            }
        };
        sampler.join();
        if let Some(bridge) = &bridge {
            bridge.shutdown();
        }
        let allocation_guard_held = guard.is_active();
        drop(guard);

        // Frames still waiting on resolver calibration fail once the last
        // handle to the resolver goes, which returns their buffers to the pool.
        let resolver_name = resolver.name();
        let ingest = ingests.iter().map(|ingest| ingest.stats()).collect();
        drop(ingests);
        drop(resolver);

        let sampled = sampled?;
        let report = SessionReport {
            start_slot: start.slot,
            samples_pushed: sampled.samples_pushed,
            resolver: resolver_name,
            correlation: correlator.stats(),
            ingest,
            allocation_guard_held,
        };
        tracing::info!(
            samples = report.samples_pushed,
            pairs = report.pairs_submitted(),
            dropped = report.correlation.dropped(),
            resolver_failures = report.correlation.resolver_failures,
            "Calibration session finished"
        );
        Ok(report)
    }
}
