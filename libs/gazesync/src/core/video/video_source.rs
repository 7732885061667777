// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Boundary with the video capture backend.
//!
//! Backends invoke handlers on their own threads. Registration is explicit:
//! [`VideoSource::subscribe`] returns a [`Subscription`] that unregisters the
//! handler when dropped.

use crate::core::Result;
use crate::core::clocks::Timestamp;
use crate::core::frames::FrameSize;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    #[default]
    None,
    /// Raw sensor mosaic, sampled as if it were single-channel.
    Bayer,
    Gray8,
    Gray16Le,
    Gray16Be,
    Bgrx,
    Yuy2,
    Nv12,
    Mjpeg,
    H264,
}

impl VideoFormat {
    /// Formats that need an external decoder before their pixels can be sampled.
    pub fn is_compressed(&self) -> bool {
        matches!(self, VideoFormat::Mjpeg | VideoFormat::H264)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub const fn new(num: u32, denom: u32) -> Self {
        Self { num, denom }
    }

    /// Frame period in ticks of a clock running at `frequency` Hz.
    pub fn frame_interval(&self, frequency: u64) -> Option<u64> {
        if self.num == 0 || self.denom == 0 {
            return None;
        }
        Some((frequency as u128 * self.denom as u128 / self.num as u128) as u64)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoMode {
    pub format: VideoFormat,
    pub size: FrameSize,
    pub framerate: Framerate,
}

/// Region of the source image feeding one channel, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub const fn full(size: FrameSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }

    /// Intersection with an image of `size`.
    pub fn clamp_to(&self, size: FrameSize) -> Self {
        let x = self.x.min(size.width);
        let y = self.y.min(size.height);
        Self {
            x,
            y,
            width: self.width.min(size.width - x),
            height: self.height.min(size.height - y),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Receives one source's mode changes and frames.
pub trait VideoFrameHandler: Send + Sync {
    /// Format or resolution changed. Frames after this call use `mode`.
    fn on_mode(&self, mode: VideoMode);

    /// One captured frame. `late_estimate` is when the backend delivered it.
    /// `data` is only valid for the duration of the call.
    fn on_frame(&self, data: &[u8], late_estimate: Timestamp);
}

pub trait VideoSource: Send + Sync {
    fn description(&self) -> &str;

    fn current_mode(&self) -> VideoMode;

    /// Register `handler`. It stays registered until the subscription is dropped.
    fn subscribe(&self, handler: Arc<dyn VideoFrameHandler>) -> Result<Subscription>;
}

/// Handle that unregisters a video handler when dropped.
#[must_use = "dropping a Subscription unregisters the handler"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

type HandlerList = Vec<(u64, Arc<dyn VideoFrameHandler>)>;

/// Handler bookkeeping for [`VideoSource`] implementations.
///
/// Publishing dispatches over a snapshot of the list, so a handler may drop
/// its own subscription from inside a callback.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Arc<HandlerList>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn VideoFrameHandler>) -> Subscription {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Arc::make_mut(&mut *self.handlers.write()).push((id, handler));
        let handlers = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                Arc::make_mut(&mut *handlers.write()).retain(|(h, _)| *h != id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn snapshot(&self) -> Arc<HandlerList> {
        Arc::clone(&self.handlers.read())
    }

    pub fn publish_mode(&self, mode: VideoMode) {
        for (_, handler) in self.snapshot().iter() {
            handler.on_mode(mode);
        }
    }

    pub fn publish_frame(&self, data: &[u8], late_estimate: Timestamp) {
        for (_, handler) in self.snapshot().iter() {
            handler.on_frame(data, late_estimate);
        }
    }
}
