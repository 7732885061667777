// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{
    DisplayRoundtrip, DisplayRoundtripConfig, FixedLatency, FrameTimestampResolver,
    OpticalFlowConfig, OpticalFlowCorrelation, RoundtripDisplay,
};
use crate::core::Result;
use crate::core::buffers::GazeRingBuffer;
use crate::core::clocks::QuantizedClock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which resolver a session uses, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameTimestampStrategy {
    FixedLatency {
        #[serde(default)]
        latency_us: u64,
    },
    DisplayRoundtrip(DisplayRoundtripConfig),
    OpticalFlowCorrelation(OpticalFlowConfig),
}

impl Default for FrameTimestampStrategy {
    fn default() -> Self {
        Self::FixedLatency { latency_us: 0 }
    }
}

/// Session resources a resolver may need.
pub struct ResolverContext {
    pub quantized: QuantizedClock,
    pub buffer: Arc<GazeRingBuffer>,
    pub display: Option<Arc<dyn RoundtripDisplay>>,
    /// Camera frame period in clock ticks, if the video mode declares one.
    pub frame_interval: Option<u64>,
}

impl FrameTimestampStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedLatency { .. } => "fixed_latency",
            Self::DisplayRoundtrip(_) => "display_roundtrip",
            Self::OpticalFlowCorrelation(_) => "optical_flow_correlation",
        }
    }

    /// Build the resolver. Missing capabilities fail with `Configuration`.
    pub fn build(&self, context: ResolverContext) -> Result<Arc<dyn FrameTimestampResolver>> {
        let resolver: Arc<dyn FrameTimestampResolver> = match self {
            Self::FixedLatency { latency_us } => Arc::new(FixedLatency::from_micros(
                *latency_us,
                context.quantized.frequency(),
            )),
            Self::DisplayRoundtrip(config) => Arc::new(DisplayRoundtrip::new(
                config.clone(),
                context.display,
                context.frame_interval,
            )?),
            Self::OpticalFlowCorrelation(config) => Arc::new(OpticalFlowCorrelation::new(
                config.clone(),
                context.buffer,
                context.quantized,
            )?),
        };
        tracing::info!(strategy = resolver.name(), "Frame timestamp resolver ready");
        Ok(resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SyncError;

    fn context() -> ResolverContext {
        let quantized = QuantizedClock::new(1_000_000_000, 1536, 4000).unwrap();
        ResolverContext {
            quantized,
            buffer: Arc::new(GazeRingBuffer::new(quantized.capacity_bits(), 1).unwrap()),
            display: None,
            frame_interval: None,
        }
    }

    #[test]
    fn test_build_fixed_latency() {
        let strategy = FrameTimestampStrategy::FixedLatency { latency_us: 10 };
        let resolver = strategy.build(context()).unwrap();
        assert_eq!(resolver.name(), "fixed_latency");
    }

    #[test]
    fn test_roundtrip_without_display_is_configuration_error() {
        let strategy = FrameTimestampStrategy::DisplayRoundtrip(DisplayRoundtripConfig::default());
        assert!(matches!(strategy.build(context()), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_strategy_yaml_tags() {
        let strategy: FrameTimestampStrategy =
            serde_yaml::from_str("kind: optical_flow_correlation\nwindow_frames: 12\n").unwrap();
        match strategy {
            FrameTimestampStrategy::OpticalFlowCorrelation(config) => {
                assert_eq!(config.window_frames, 12);
                assert_eq!(config.lag_step_us, OpticalFlowConfig::default().lag_step_us);
            }
            other => panic!("unexpected strategy {:?}", other),
        }
        let fixed: FrameTimestampStrategy = serde_yaml::from_str("kind: fixed_latency\n").unwrap();
        assert_eq!(fixed, FrameTimestampStrategy::default());
    }
}
