// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! DisplayRoundtrip - Measures capture latency once by filming a display
//! transition, then behaves like a fixed latency snapped to the frame grid.
//!
//! Probe sequence:
//! 1. Average the brightness of the first few frames as a dark baseline.
//! 2. Ask the display to switch to bright and learn when it did (`T0`).
//! 3. The first frame delivered at or after `T0` whose brightness rises above
//!    the baseline by `brightness_threshold` fixes `latency = late - T0`.
//!
//! Every frame's future waits for the probe to finish, and fails once the
//! resolver is dropped. Snapping to the frame interval removes delivery
//! jitter but not clock drift.

use super::resolver::{BoxFuture, FrameTimestampResolver, snap_to_interval};
use crate::core::clocks::Timestamp;
use crate::core::frames::FrameSize;
use crate::core::{Result, SyncError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Dark frames averaged before the transition is requested.
const BASELINE_FRAMES: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayRoundtripConfig {
    /// Rise in mean brightness (0..1) that marks the transition arriving.
    pub brightness_threshold: f32,
    /// Frames to watch for the transition before the probe fails.
    pub max_probe_frames: u32,
}

impl Default for DisplayRoundtripConfig {
    fn default() -> Self {
        Self {
            brightness_threshold: 0.2,
            max_probe_frames: 240,
        }
    }
}

/// Display capable of presenting a sharp dark-to-bright transition.
pub trait RoundtripDisplay: Send + Sync {
    /// Switch to bright. Resolves to the pose-domain time it was presented.
    fn present_transition(&self) -> BoxFuture<'static, Result<Timestamp>>;
}

#[derive(Debug, Clone)]
enum ProbeOutcome {
    Pending,
    Ready { latency: u64, anchor: Timestamp },
    Failed(String),
}

enum ProbePhase {
    Baseline {
        frames: u32,
        brightness_sum: f64,
    },
    /// Transition requested, presentation time not known yet.
    Presenting {
        baseline: f32,
        frames: u32,
        observed: Vec<(Timestamp, f32)>,
    },
    Watching {
        baseline: f32,
        presented_at: Timestamp,
        frames: u32,
    },
    Done,
}

struct Shared {
    config: DisplayRoundtripConfig,
    frame_interval: Option<u64>,
    display: Arc<dyn RoundtripDisplay>,
    phase: Mutex<ProbePhase>,
    outcome: watch::Sender<ProbeOutcome>,
}

impl Shared {
    fn is_transition(&self, baseline: f32, brightness: f32) -> bool {
        brightness - baseline >= self.config.brightness_threshold
    }

    fn complete(&self, phase: &mut ProbePhase, late_estimate: Timestamp, presented_at: Timestamp) {
        let latency = late_estimate - presented_at;
        *phase = ProbePhase::Done;
        tracing::info!(latency, presented_at, "Display roundtrip latency measured");
        self.outcome.send_replace(ProbeOutcome::Ready {
            latency,
            anchor: presented_at,
        });
    }

    fn fail(&self, phase: &mut ProbePhase, reason: String) {
        *phase = ProbePhase::Done;
        tracing::warn!(%reason, "Display roundtrip probe failed");
        self.outcome.send_replace(ProbeOutcome::Failed(reason));
    }

    /// Feed one frame to the probe. Returns true if this frame must trigger
    /// the display transition.
    fn observe(&self, late_estimate: Timestamp, brightness: f32) -> bool {
        let max_frames = self.config.max_probe_frames;
        let mut guard = self.phase.lock();
        let phase = &mut *guard;
        match phase {
            ProbePhase::Baseline {
                frames,
                brightness_sum,
            } => {
                *frames += 1;
                *brightness_sum += brightness as f64;
                if *frames >= BASELINE_FRAMES {
                    let baseline = (*brightness_sum / *frames as f64) as f32;
                    tracing::debug!(baseline, "Display roundtrip baseline captured");
                    *phase = ProbePhase::Presenting {
                        baseline,
                        frames: 0,
                        observed: Vec::with_capacity(max_frames as usize),
                    };
                    return true;
                }
            }
            ProbePhase::Presenting {
                frames, observed, ..
            } => {
                *frames += 1;
                observed.push((late_estimate, brightness));
                if *frames > max_frames {
                    self.fail(
                        phase,
                        format!("display transition not presented within {} frames", max_frames),
                    );
                }
            }
            ProbePhase::Watching {
                baseline,
                presented_at,
                frames,
            } => {
                *frames += 1;
                let (baseline, presented_at) = (*baseline, *presented_at);
                if late_estimate >= presented_at && self.is_transition(baseline, brightness) {
                    self.complete(phase, late_estimate, presented_at);
                } else if *frames > max_frames {
                    self.fail(
                        phase,
                        format!("transition not observed within {} frames", max_frames),
                    );
                }
            }
            ProbePhase::Done => {}
        }
        false
    }

    async fn present(&self) {
        let result = self.display.present_transition().await;
        let mut guard = self.phase.lock();
        let phase = &mut *guard;
        let presented_at = match result {
            Ok(t) => t,
            Err(e) => {
                if !matches!(phase, ProbePhase::Done) {
                    self.fail(phase, format!("display transition failed: {}", e));
                }
                return;
            }
        };

        let ProbePhase::Presenting {
            baseline,
            frames,
            observed,
        } = std::mem::replace(phase, ProbePhase::Done)
        else {
            return;
        };
        let arrived = observed
            .iter()
            .find(|(late, brightness)| *late >= presented_at && self.is_transition(baseline, *brightness));
        match arrived {
            Some(&(late, _)) => self.complete(phase, late, presented_at),
            None => {
                *phase = ProbePhase::Watching {
                    baseline,
                    presented_at,
                    frames,
                }
            }
        }
    }
}

/// Mean Gray8 brightness in `[0, 1]`.
fn mean_brightness(frame: &[u8]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.iter().map(|&p| p as u64).sum();
    (sum as f64 / frame.len() as f64 / 255.0) as f32
}

pub struct DisplayRoundtrip {
    shared: Arc<Shared>,
}

impl DisplayRoundtrip {
    /// `frame_interval` is the camera's frame period in clock ticks, if known.
    pub fn new(
        config: DisplayRoundtripConfig,
        display: Option<Arc<dyn RoundtripDisplay>>,
        frame_interval: Option<u64>,
    ) -> Result<Self> {
        let display = display.ok_or_else(|| {
            SyncError::Configuration(
                "display roundtrip timing requires a display that can present a transition".into(),
            )
        })?;
        if !(config.brightness_threshold > 0.0 && config.brightness_threshold <= 1.0) {
            return Err(SyncError::Configuration(format!(
                "brightness_threshold must be in (0, 1], got {}",
                config.brightness_threshold
            )));
        }
        if config.max_probe_frames == 0 {
            return Err(SyncError::Configuration("max_probe_frames must be positive".into()));
        }

        let (outcome, _) = watch::channel(ProbeOutcome::Pending);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                frame_interval: frame_interval.filter(|&i| i > 0),
                display,
                phase: Mutex::new(ProbePhase::Baseline {
                    frames: 0,
                    brightness_sum: 0.0,
                }),
                outcome,
            }),
        })
    }

    /// Measured latency in ticks, once the probe has succeeded.
    pub fn latency(&self) -> Option<u64> {
        match &*self.shared.outcome.borrow() {
            ProbeOutcome::Ready { latency, .. } => Some(*latency),
            _ => None,
        }
    }
}

impl FrameTimestampResolver for DisplayRoundtrip {
    fn resolve(
        &self,
        frame: &[u8],
        _size: FrameSize,
        late_estimate: Timestamp,
    ) -> BoxFuture<'static, Result<Timestamp>> {
        let trigger = self.shared.observe(late_estimate, mean_brightness(frame));
        // Only the triggering frame keeps the probe alive, and only while the
        // display presents. Dropping the resolver closes `rx` for the rest.
        let presenter = trigger.then(|| Arc::clone(&self.shared));
        let frame_interval = self.shared.frame_interval;
        let mut rx = self.shared.outcome.subscribe();
        Box::pin(async move {
            if let Some(shared) = presenter {
                shared.present().await;
            }
            let outcome = rx
                .wait_for(|o| !matches!(o, ProbeOutcome::Pending))
                .await
                .map(|o| (*o).clone())
                .map_err(|_| {
                    SyncError::Calibration("display roundtrip closed before the latency was measured".into())
                })?;
            match outcome {
                ProbeOutcome::Ready { latency, anchor } => {
                    let raw = late_estimate.saturating_sub(latency);
                    Ok(match frame_interval {
                        Some(interval) => snap_to_interval(raw, anchor, interval),
                        None => raw,
                    })
                }
                ProbeOutcome::Failed(reason) => Err(SyncError::Calibration(reason)),
                ProbeOutcome::Pending => Err(SyncError::Runtime("probe still pending".into())),
            }
        })
    }

    fn name(&self) -> &'static str {
        "display_roundtrip"
    }
}
