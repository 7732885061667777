// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Calibration session configuration, loadable from YAML or TOML.

use crate::core::buffers::{AllocationBudget, FramePoolConfig, GuardMode};
use crate::core::frames::{FrameSize, GazeEncoding};
use crate::core::math::{Transform2D, Vec3};
use crate::core::timing::FrameTimestampStrategy;
use crate::core::video::{ChannelInput, CropRect};
use crate::core::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which source feeds a gaze channel and how its image is cut out.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Index into the session's video sources.
    pub source: usize,
    /// Full frame when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
    /// Identity when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform2D>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramePoolSettings {
    pub max_retained: usize,
}

impl Default for FramePoolSettings {
    fn default() -> Self {
        Self {
            max_retained: FramePoolConfig::DEFAULT_MAX_RETAINED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationGuardConfig {
    pub soft_bytes: usize,
    pub hard_bytes: usize,
    pub mode: GuardMode,
}

impl Default for AllocationGuardConfig {
    fn default() -> Self {
        let budget = AllocationBudget::default();
        Self {
            soft_bytes: budget.soft_bytes,
            hard_bytes: budget.hard_bytes,
            mode: GuardMode::default(),
        }
    }
}

impl AllocationGuardConfig {
    pub fn budget(&self) -> AllocationBudget {
        AllocationBudget {
            soft_bytes: self.soft_bytes,
            hard_bytes: self.hard_bytes,
        }
    }
}

/// Everything a calibration session needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on pose samples per second.
    pub max_poll_rate_hz: u64,
    /// How far back gaze history must reach, in milliseconds.
    pub max_latency_window_ms: u64,
    pub channels: Vec<ChannelConfig>,
    pub frame_timestamp_strategy: FrameTimestampStrategy,
    /// Size of the Gray8 frames handed to training consumers.
    pub input_size: FrameSize,
    /// World-space point the viewer is assumed to look at.
    pub focus_point: Vec3,
    pub gaze_encoding: GazeEncoding,
    pub frame_pool: FramePoolSettings,
    pub allocation_guard: AllocationGuardConfig,
    /// How long a frame may wait for the pose sample after it.
    pub pending_sample_wait_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_poll_rate_hz: 1536,
            max_latency_window_ms: 4000,
            channels: vec![ChannelConfig::default()],
            frame_timestamp_strategy: FrameTimestampStrategy::default(),
            input_size: FrameSize::default(),
            focus_point: Vec3::new(0.0, 1.5, -4096.0),
            gaze_encoding: GazeEncoding::default(),
            frame_pool: FramePoolSettings::default(),
            allocation_guard: AllocationGuardConfig::default(),
            pending_sample_wait_ms: 50,
        }
    }
}

impl SessionConfig {
    /// Load and validate a configuration file. `.yaml`/`.yml` and `.toml`
    /// are recognized by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::parse(path, &content)?;
        config.validate()?;

        tracing::info!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Like [`SessionConfig::load`], falling back to defaults if the file is
    /// missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No session config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(content).map_err(|e| {
                SyncError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Some("toml") => toml::from_str(content).map_err(|e| {
                SyncError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
            }),
            _ => Err(SyncError::Configuration(format!(
                "Unsupported config format: {} (expected .yaml, .yml or .toml)",
                path.display()
            ))),
        }
    }

    /// Reject values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(SyncError::Configuration(
                "at least one channel is required".into(),
            ));
        }
        if self.max_poll_rate_hz == 0 {
            return Err(SyncError::Configuration(
                "max_poll_rate_hz must be positive".into(),
            ));
        }
        if self.max_latency_window_ms == 0 {
            return Err(SyncError::Configuration(
                "max_latency_window_ms must be positive".into(),
            ));
        }
        if self.input_size.is_empty() {
            return Err(SyncError::Configuration(format!(
                "input_size {}x{} is empty",
                self.input_size.width, self.input_size.height
            )));
        }
        if self.allocation_guard.soft_bytes > self.allocation_guard.hard_bytes {
            return Err(SyncError::Configuration(format!(
                "allocation_guard soft budget ({}) exceeds hard budget ({})",
                self.allocation_guard.soft_bytes, self.allocation_guard.hard_bytes
            )));
        }
        for (channel, config) in self.channels.iter().enumerate() {
            if matches!(config.crop, Some(crop) if crop.width == 0 || crop.height == 0) {
                return Err(SyncError::Configuration(format!(
                    "channel {} has an empty crop",
                    channel
                )));
            }
        }
        Ok(())
    }

    /// Check every channel refers to one of `source_count` video sources.
    pub fn check_sources(&self, source_count: usize) -> Result<()> {
        for (channel, config) in self.channels.iter().enumerate() {
            if config.source >= source_count {
                return Err(SyncError::Configuration(format!(
                    "channel {} uses video source {}, but only {} source(s) are attached",
                    channel, config.source, source_count
                )));
            }
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channels fed by video source `source`, in channel order.
    pub fn channel_inputs(&self, source: usize) -> Vec<ChannelInput> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, config)| config.source == source)
            .map(|(channel, config)| ChannelInput {
                channel,
                crop: config.crop,
                transform: config.transform.unwrap_or_default(),
            })
            .collect()
    }

    pub fn pending_sample_wait(&self) -> Duration {
        Duration::from_millis(self.pending_sample_wait_ms)
    }

    pub fn frame_pool_config(&self) -> FramePoolConfig {
        FramePoolConfig {
            frame_len: self.input_size.gray8_len(),
            max_retained: self.frame_pool.max_retained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timing::OpticalFlowConfig;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_poll_rate_hz, 1536);
        assert_eq!(config.max_latency_window_ms, 4000);
        assert_eq!(config.channel_count(), 1);
        assert_eq!(config.input_size, FrameSize::new(256, 256));
        assert_eq!(
            config.frame_timestamp_strategy,
            FrameTimestampStrategy::FixedLatency { latency_us: 0 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "session.yaml",
            r#"
max_poll_rate_hz: 1000
channels:
  - source: 0
    crop: { x: 0, y: 0, width: 320, height: 240 }
  - source: 0
    crop: { x: 320, y: 0, width: 320, height: 240 }
    transform: { m11: -1.0, m12: 0.0, m21: 0.0, m22: 1.0, m31: 1.0, m32: 0.0 }
frame_timestamp_strategy:
  kind: optical_flow_correlation
  window_frames: 32
allocation_guard:
  mode: strict
"#,
        );

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.max_poll_rate_hz, 1000);
        assert_eq!(config.max_latency_window_ms, 4000);
        assert_eq!(config.channel_count(), 2);
        assert_eq!(config.channels[1].transform, Some(Transform2D::MIRROR_X));
        assert_eq!(config.allocation_guard.mode, GuardMode::Strict);
        assert_eq!(
            config.allocation_guard.soft_bytes,
            AllocationBudget::default().soft_bytes
        );
        match config.frame_timestamp_strategy {
            FrameTimestampStrategy::OpticalFlowCorrelation(flow) => {
                assert_eq!(flow.window_frames, 32);
                assert_eq!(flow.max_lag_us, OpticalFlowConfig::default().max_lag_us);
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "session.toml",
            r#"
max_latency_window_ms = 2000
pending_sample_wait_ms = 20

[frame_timestamp_strategy]
kind = "fixed_latency"
latency_us = 8000

[[channels]]
source = 1

[input_size]
width = 128
height = 96
"#,
        );

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.max_latency_window_ms, 2000);
        assert_eq!(config.pending_sample_wait(), Duration::from_millis(20));
        assert_eq!(
            config.frame_timestamp_strategy,
            FrameTimestampStrategy::FixedLatency { latency_us: 8000 }
        );
        assert_eq!(config.channels[0].source, 1);
        assert_eq!(config.frame_pool_config().frame_len, 128 * 96);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "session.json", "{}");
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = SessionConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::load_or_default(&dir.path().join("session.yaml"));
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_load_or_default_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "session.yaml", "{{invalid yaml");
        assert_eq!(SessionConfig::load_or_default(&path), SessionConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "session.yaml", "max_poll_rate_hz: 0\n");
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("max_poll_rate_hz"));
    }

    #[test]
    fn test_validate() {
        let mut config = SessionConfig::default();
        config.channels.clear();
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.max_latency_window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.input_size = FrameSize::new(0, 256);
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.allocation_guard.soft_bytes = config.allocation_guard.hard_bytes + 1;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.channels[0].crop = Some(CropRect {
            x: 0,
            y: 0,
            width: 0,
            height: 10,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_sources() {
        let mut config = SessionConfig::default();
        config.channels.push(ChannelConfig {
            source: 1,
            ..Default::default()
        });
        assert!(config.check_sources(2).is_ok());
        let err = config.check_sources(1).unwrap_err();
        assert!(err.to_string().contains("channel 1 uses video source 1"));
    }

    #[test]
    fn test_channel_inputs_per_source() {
        let mut config = SessionConfig::default();
        config.channels = vec![
            ChannelConfig {
                source: 1,
                ..Default::default()
            },
            ChannelConfig::default(),
            ChannelConfig {
                source: 1,
                crop: None,
                transform: Some(Transform2D::MIRROR_X),
            },
        ];

        let first = config.channel_inputs(0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].channel, 1);
        assert_eq!(first[0].transform, Transform2D::IDENTITY);

        let second = config.channel_inputs(1);
        assert_eq!(
            second.iter().map(|c| c.channel).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(second[1].transform, Transform2D::MIRROR_X);
        assert!(config.channel_inputs(2).is_empty());
    }
}
