// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! OpticalFlowCorrelation - Estimates capture latency continuously by
//! correlating image motion with head motion.
//!
//! Each frame is reduced to a small thumbnail and compared with the previous
//! one to get a scalar normal-flow magnitude. Over a sliding window of frames,
//! that motion signal is cross-correlated with the gaze angular speed read
//! from the ring buffer at `late - lag` for every candidate lag. The lag with
//! the strongest Pearson correlation wins and the correlation coefficient is
//! its confidence.
//!
//! Confident estimates are kept in a short history. A frame whose own
//! estimate is weak waits for the next confident estimate, for at most
//! `max_gap_frames` frames, then blends its estimate with the lag
//! interpolated between the confident neighbours on either side. Until the
//! first confident estimate exists, frames wait for it, for at most
//! `warmup_frames` frames. Waiting frames fail once the resolver is dropped.

use super::resolver::{BoxFuture, FrameTimestampResolver, apply_lag};
use crate::core::buffers::GazeRingBuffer;
use crate::core::clocks::{QuantizedClock, Timestamp};
use crate::core::frames::FrameSize;
use crate::core::{Result, SyncError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

const THUMB: usize = 32;
const MAX_CANDIDATE_LAGS: usize = 1024;
const MAX_LAG_HISTORY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalFlowConfig {
    /// Frames of motion history correlated per estimate.
    pub window_frames: usize,
    pub min_lag_us: i64,
    pub max_lag_us: i64,
    pub lag_step_us: u64,
    /// Correlation coefficient at which an estimate is trusted on its own.
    pub confidence_threshold: f32,
    /// Frames to wait for the first confident estimate.
    pub warmup_frames: u32,
    /// Frames a weak frame waits for a later confident estimate before it
    /// settles for the lag on one side. Zero resolves weak frames at once.
    pub max_gap_frames: u32,
}

impl Default for OpticalFlowConfig {
    fn default() -> Self {
        Self {
            window_frames: 48,
            min_lag_us: -20_000,
            max_lag_us: 250_000,
            lag_step_us: 2_000,
            confidence_threshold: 0.6,
            warmup_frames: 600,
            max_gap_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LagEstimate {
    at: Timestamp,
    lag: i64,
    confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Warmup {
    Pending,
    Ready,
    Exhausted,
}

/// Published after every observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    warmup: Warmup,
    frames_seen: u32,
    newest_confident: Option<Timestamp>,
}

/// What a waiting frame needs before it can resolve.
#[derive(Debug, Clone, Copy)]
enum Release {
    Warmup,
    /// A confident estimate later than the frame, or `until_frame` frames seen.
    Gap { until_frame: u32 },
}

impl Release {
    fn reached(self, progress: &Progress, late_estimate: Timestamp) -> bool {
        match self {
            Release::Warmup => progress.warmup != Warmup::Pending,
            Release::Gap { until_frame } => {
                progress.newest_confident.is_some_and(|at| at > late_estimate)
                    || progress.frames_seen >= until_frame
            }
        }
    }
}

struct Thumbnail([f32; THUMB * THUMB]);

impl Thumbnail {
    /// Nearest-sample Gray8 downscale. Short or empty frames give a black thumbnail.
    fn from_frame(frame: &[u8], size: FrameSize) -> Self {
        let mut pixels = [0.0f32; THUMB * THUMB];
        let (w, h) = (size.width as usize, size.height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Self(pixels);
        }
        for ty in 0..THUMB {
            let y = (2 * ty + 1) * h / (2 * THUMB);
            let row = &frame[y * w..(y + 1) * w];
            for tx in 0..THUMB {
                let x = (2 * tx + 1) * w / (2 * THUMB);
                pixels[ty * THUMB + tx] = row[x] as f32 / 255.0;
            }
        }
        Self(pixels)
    }
}

/// Gradient-weighted normal flow magnitude between two thumbnails, in
/// thumbnail pixels per frame.
fn normal_flow(previous: &Thumbnail, current: &Thumbnail) -> f32 {
    let (prev, cur) = (&previous.0, &current.0);
    let mut weighted = 0.0f64;
    let mut energy = 0.0f64;
    for y in 1..THUMB - 1 {
        for x in 1..THUMB - 1 {
            let i = y * THUMB + x;
            let gx = (cur[i + 1] - cur[i - 1]) * 0.5;
            let gy = (cur[i + THUMB] - cur[i - THUMB]) * 0.5;
            let g2 = (gx * gx + gy * gy) as f64;
            let it = (cur[i] - prev[i]).abs() as f64;
            weighted += it * g2.sqrt();
            energy += g2;
        }
    }
    if energy < 1e-9 {
        return 0.0;
    }
    (weighted / energy) as f32
}

/// Pearson correlation coefficient. Zero when either series is flat.
fn pearson(xs: &[f32], ys: &[f32]) -> f32 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean = |v: &[f32]| v[..n].iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    let (mx, my) = (mean(xs), mean(ys));
    let (mut cov, mut vx, mut vy) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in xs[..n].iter().zip(&ys[..n]) {
        let (dx, dy) = (x as f64 - mx, y as f64 - my);
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx < 1e-12 || vy < 1e-12 {
        return 0.0;
    }
    (cov / (vx * vy).sqrt()) as f32
}

/// Lag at `at`, interpolated linearly between the confident estimates around it.
fn interpolate_lag(history: &VecDeque<LagEstimate>, at: Timestamp) -> Option<f64> {
    let after = history.partition_point(|e| e.at <= at);
    let before = after.checked_sub(1).and_then(|i| history.get(i));
    match (before, history.get(after)) {
        (Some(b), Some(a)) => {
            let span = (a.at - b.at) as f64;
            let w = if span > 0.0 { (at - b.at) as f64 / span } else { 0.0 };
            Some(b.lag as f64 + (a.lag - b.lag) as f64 * w)
        }
        (Some(e), None) | (None, Some(e)) => Some(e.lag as f64),
        (None, None) => None,
    }
}

struct FlowState {
    previous: Option<Thumbnail>,
    flows: VecDeque<(Timestamp, f32)>,
    history: VecDeque<LagEstimate>,
    frames_seen: u32,
    flow_scratch: Vec<f32>,
    speed_scratch: Vec<f32>,
    slot_speeds: Vec<f32>,
}

struct Shared {
    config: OpticalFlowConfig,
    buffer: Arc<GazeRingBuffer>,
    quantized: QuantizedClock,
    lags: Vec<i64>,
    state: Mutex<FlowState>,
    progress: watch::Sender<Progress>,
}

impl Shared {
    /// Mean angular change across channels from each slot to the next, for
    /// the live slots within `lo..=hi`. Returns the slot of `speeds[0]`.
    fn gaze_speeds(&self, lo: u64, hi: u64, speeds: &mut Vec<f32>) -> u64 {
        speeds.clear();
        let view = self.buffer.view();
        let start = lo.max(view.oldest());
        let Some(newest) = view.head().checked_sub(2) else {
            return start;
        };
        let channels = self.buffer.channel_count();
        for index in start..=hi.min(newest) {
            let total: f32 = (0..channels)
                .filter_map(|c| view.channel_pair(index, c))
                .map(|(a, b)| a.angle_between(b))
                .sum();
            speeds.push(total / channels as f32);
        }
        start
    }

    /// Best lag over the current window, if every candidate has gaze history.
    fn estimate(&self, state: &mut FlowState, at: Timestamp) -> Option<LagEstimate> {
        let FlowState {
            flows,
            flow_scratch,
            speed_scratch,
            slot_speeds,
            ..
        } = state;
        let earliest = flows.iter().map(|&(late, _)| late).min()?;
        let latest = flows.iter().map(|&(late, _)| late).max()?;
        // Candidate lags ascend, so the largest reaches furthest back.
        let lo = self.quantized.quantize(apply_lag(earliest, *self.lags.last()?));
        let hi = self.quantized.quantize(apply_lag(latest, *self.lags.first()?));
        let first_slot = self.gaze_speeds(lo, hi, slot_speeds);
        let speed_at = |t: Timestamp| {
            let offset = self.quantized.quantize(t).checked_sub(first_slot)?;
            slot_speeds.get(usize::try_from(offset).ok()?).copied()
        };

        flow_scratch.clear();
        flow_scratch.extend(flows.iter().map(|&(_, f)| f));

        let mut best: Option<LagEstimate> = None;
        'lags: for &lag in &self.lags {
            speed_scratch.clear();
            for &(late, _) in flows.iter() {
                match speed_at(apply_lag(late, lag)) {
                    Some(speed) => speed_scratch.push(speed),
                    None => continue 'lags,
                }
            }
            let r = pearson(&flow_scratch[..], &speed_scratch[..]);
            if best.is_none_or(|b| r > b.confidence) {
                best = Some(LagEstimate {
                    at,
                    lag,
                    confidence: r,
                });
            }
        }
        best.map(|b| LagEstimate {
            confidence: b.confidence.max(0.0),
            ..b
        })
    }

    /// Add a confident estimate to the history.
    fn record(&self, state: &mut FlowState, estimate: LagEstimate) {
        let at = state.history.partition_point(|e| e.at <= estimate.at);
        state.history.insert(at, estimate);
        if state.history.len() > MAX_LAG_HISTORY {
            state.history.pop_front();
        }
        tracing::trace!(lag = estimate.lag, confidence = estimate.confidence, "Confident lag estimate");
        if self.progress.borrow().warmup != Warmup::Ready {
            tracing::info!(lag = estimate.lag, confidence = estimate.confidence, "Optical flow timing locked");
        }
        self.progress.send_modify(|p| {
            p.warmup = Warmup::Ready;
            p.newest_confident = p.newest_confident.max(Some(estimate.at));
        });
    }

    /// Wake frames waiting on the frame count.
    fn publish_frames_seen(&self, frames_seen: u32) {
        self.progress.send_modify(|p| p.frames_seen = frames_seen);
    }

    fn blend(&self, measured: Option<LagEstimate>, fallback: f64) -> i64 {
        match measured {
            Some(m) => {
                let w = (m.confidence / self.config.confidence_threshold).clamp(0.0, 1.0) as f64;
                (m.lag as f64 * w + fallback * (1.0 - w)).round() as i64
            }
            None => fallback.round() as i64,
        }
    }
}

enum Plan {
    Ready(i64),
    Wait(Option<LagEstimate>, Release),
    Exhausted,
}

pub struct OpticalFlowCorrelation {
    shared: Arc<Shared>,
}

impl OpticalFlowCorrelation {
    pub fn new(
        config: OpticalFlowConfig,
        buffer: Arc<GazeRingBuffer>,
        quantized: QuantizedClock,
    ) -> Result<Self> {
        if config.window_frames < 3 {
            return Err(SyncError::Configuration(format!(
                "window_frames must be at least 3, got {}",
                config.window_frames
            )));
        }
        if config.lag_step_us == 0 || config.min_lag_us > config.max_lag_us {
            return Err(SyncError::Configuration(format!(
                "invalid lag range {}..={} step {}us",
                config.min_lag_us, config.max_lag_us, config.lag_step_us
            )));
        }
        if !(config.confidence_threshold > 0.0 && config.confidence_threshold <= 1.0) {
            return Err(SyncError::Configuration(format!(
                "confidence_threshold must be in (0, 1], got {}",
                config.confidence_threshold
            )));
        }
        let span = config.max_lag_us.checked_sub(config.min_lag_us).ok_or_else(|| {
            SyncError::Configuration(format!(
                "lag range {}..={} is too wide",
                config.min_lag_us, config.max_lag_us
            ))
        })? as u64;
        let count = usize::try_from(span / config.lag_step_us)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        if count > MAX_CANDIDATE_LAGS {
            return Err(SyncError::Configuration(format!(
                "{} candidate lags exceeds the limit of {}",
                count, MAX_CANDIDATE_LAGS
            )));
        }

        let frequency = quantized.frequency() as i128;
        let lags = (0..count)
            .map(|k| {
                let us = config.min_lag_us as i128 + k as i128 * config.lag_step_us as i128;
                (us * frequency / 1_000_000) as i64
            })
            .collect();
        tracing::debug!(candidates = count, window = config.window_frames, "Optical flow resolver configured");

        let window = config.window_frames;
        let (progress, _) = watch::channel(Progress {
            warmup: Warmup::Pending,
            frames_seen: 0,
            newest_confident: None,
        });
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                buffer,
                quantized,
                lags,
                state: Mutex::new(FlowState {
                    previous: None,
                    flows: VecDeque::with_capacity(window + 1),
                    history: VecDeque::with_capacity(MAX_LAG_HISTORY + 1),
                    frames_seen: 0,
                    flow_scratch: Vec::with_capacity(window),
                    speed_scratch: Vec::with_capacity(window),
                    slot_speeds: Vec::new(),
                }),
                progress,
            }),
        })
    }

    /// Most recent confident lag, in ticks.
    pub fn current_lag(&self) -> Option<i64> {
        self.shared.state.lock().history.back().map(|e| e.lag)
    }

    fn observe(&self, frame: &[u8], size: FrameSize, late_estimate: Timestamp) -> Plan {
        let shared = &self.shared;
        let thumbnail = Thumbnail::from_frame(frame, size);
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        state.frames_seen = state.frames_seen.saturating_add(1);

        if let Some(previous) = &state.previous {
            let flow = normal_flow(previous, &thumbnail);
            state.flows.push_back((late_estimate, flow));
            if state.flows.len() > shared.config.window_frames {
                state.flows.pop_front();
            }
        }
        state.previous = Some(thumbnail);

        let measured = if state.flows.len() >= shared.config.window_frames {
            shared.estimate(state, late_estimate)
        } else {
            None
        };

        let confident = measured.filter(|m| m.confidence >= shared.config.confidence_threshold);
        if let Some(m) = confident {
            shared.record(state, m);
        }

        let frames_seen = state.frames_seen;
        let newest = state.history.back().map(|e| e.at);
        let plan = match newest {
            None if frames_seen <= shared.config.warmup_frames => Plan::Wait(measured, Release::Warmup),
            None => {
                if shared.progress.borrow().warmup == Warmup::Pending {
                    tracing::warn!(frames = frames_seen, "No confident optical flow lag within warmup");
                    shared.progress.send_modify(|p| p.warmup = Warmup::Exhausted);
                }
                Plan::Exhausted
            }
            Some(newest)
                if confident.is_some()
                    || newest > late_estimate
                    || shared.config.max_gap_frames == 0 =>
            {
                match interpolate_lag(&state.history, late_estimate) {
                    Some(fallback) => Plan::Ready(shared.blend(measured, fallback)),
                    None => Plan::Exhausted,
                }
            }
            Some(_) => Plan::Wait(
                measured,
                Release::Gap {
                    until_frame: frames_seen.saturating_add(shared.config.max_gap_frames),
                },
            ),
        };
        drop(guard);
        shared.publish_frames_seen(frames_seen);
        plan
    }
}

/// Resolve a frame once `release` is reached.
///
/// Holds only a receiver and a weak handle, so dropping the resolver closes
/// the channel and ends the wait.
async fn settle(
    mut progress: watch::Receiver<Progress>,
    shared: Weak<Shared>,
    release: Release,
    measured: Option<LagEstimate>,
    late_estimate: Timestamp,
) -> Result<Timestamp> {
    let reached = progress
        .wait_for(|p| release.reached(p, late_estimate))
        .await
        .map(|p| *p)
        .map_err(|_| SyncError::Calibration("optical flow resolver closed before the lag was known".into()))?;
    if reached.warmup == Warmup::Exhausted {
        return Err(SyncError::Calibration(
            "no confident optical flow lag within warmup".into(),
        ));
    }
    let shared = shared
        .upgrade()
        .ok_or_else(|| SyncError::Calibration("optical flow resolver closed before the lag was known".into()))?;
    let fallback = interpolate_lag(&shared.state.lock().history, late_estimate)
        .ok_or_else(|| SyncError::Calibration("lag history empty".into()))?;
    Ok(apply_lag(late_estimate, shared.blend(measured, fallback)))
}

impl FrameTimestampResolver for OpticalFlowCorrelation {
    fn resolve(
        &self,
        frame: &[u8],
        size: FrameSize,
        late_estimate: Timestamp,
    ) -> BoxFuture<'static, Result<Timestamp>> {
        match self.observe(frame, size, late_estimate) {
            Plan::Ready(lag) => Box::pin(std::future::ready(Ok(apply_lag(late_estimate, lag)))),
            Plan::Exhausted => Box::pin(std::future::ready(Err(SyncError::Calibration(
                "no confident optical flow lag yet".into(),
            )))),
            Plan::Wait(measured, release) => Box::pin(settle(
                self.shared.progress.subscribe(),
                Arc::downgrade(&self.shared),
                release,
                measured,
                late_estimate,
            )),
        }
    }

    fn name(&self) -> &'static str {
        "optical_flow_correlation"
    }
}
