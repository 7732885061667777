// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Nearest-sample luma resampling from raw video formats into Gray8.
//!
//! Output pixels are mapped into a unit square (centered along the shorter
//! axis so the aspect ratio is kept), pushed through the channel's affine
//! transform, then scaled onto the crop region. Samples landing outside the
//! crop read as black.

use super::{CropRect, VideoFormat, VideoMode};
use crate::core::frames::FrameSize;
use crate::core::math::Transform2D;

/// Where luma lives in one frame of a given format.
#[derive(Debug, Clone, Copy)]
struct LumaLayout {
    /// Bytes between horizontally adjacent pixels.
    pixel_stride: usize,
    /// Bytes between rows.
    row_stride: usize,
    /// `(byte offset within pixel, weight)` per contributing component.
    planes: [(usize, f32); 3],
    plane_count: usize,
}

impl LumaLayout {
    fn for_mode(mode: &VideoMode) -> Option<Self> {
        let width = mode.size.width as usize;
        let single = |pixel_stride: usize, offset: usize| LumaLayout {
            pixel_stride,
            row_stride: width * pixel_stride,
            planes: [(offset, 1.0), (0, 0.0), (0, 0.0)],
            plane_count: 1,
        };
        match mode.format {
            VideoFormat::Gray8 | VideoFormat::Bayer | VideoFormat::Nv12 => Some(single(1, 0)),
            VideoFormat::Gray16Le => Some(single(2, 1)),
            VideoFormat::Gray16Be => Some(single(2, 0)),
            VideoFormat::Yuy2 => Some(single(2, 0)),
            VideoFormat::Bgrx => Some(LumaLayout {
                pixel_stride: 4,
                row_stride: width * 4,
                planes: [(0, 0.114), (1, 0.587), (2, 0.299)],
                plane_count: 3,
            }),
            VideoFormat::None | VideoFormat::Mjpeg | VideoFormat::H264 => None,
        }
    }

    fn sample(&self, data: &[u8], x: usize, y: usize) -> f32 {
        let base = y * self.row_stride + x * self.pixel_stride;
        self.planes[..self.plane_count]
            .iter()
            .map(|&(offset, weight)| data[base + offset] as f32 * weight)
            .sum()
    }
}

/// Resample the luma of `crop` through `transform` into `out` as a Gray8
/// image of `out_size`.
///
/// Returns false, leaving `out` unspecified, if the format has no sampleable
/// luma, any size is empty, or `data`/`out` are too short.
pub fn resample_luma(
    data: &[u8],
    mode: &VideoMode,
    crop: &CropRect,
    transform: &Transform2D,
    out: &mut [u8],
    out_size: FrameSize,
) -> bool {
    let Some(layout) = LumaLayout::for_mode(mode) else {
        return false;
    };
    let crop = crop.clamp_to(mode.size);
    if crop.width == 0 || crop.height == 0 || out_size.is_empty() || out.len() < out_size.gray8_len() {
        return false;
    }

    let last_x = (crop.x + crop.width - 1) as usize;
    let last_y = (crop.y + crop.height - 1) as usize;
    let max_offset = layout.planes[..layout.plane_count]
        .iter()
        .map(|&(offset, _)| offset)
        .max()
        .unwrap_or(0);
    let last_byte = last_y
        .checked_mul(layout.row_stride)
        .and_then(|row| row.checked_add(last_x * layout.pixel_stride + max_offset));
    match last_byte {
        Some(last) if last < data.len() => {}
        _ => return false,
    }

    let (w, h) = (out_size.width, out_size.height);
    let longest = w.max(h);
    let norm = if longest > 1 { 1.0 / (longest - 1) as f32 } else { 0.0 };
    let x_offset = if w > h { 0.0 } else { (h - w) as f32 * 0.5 * norm };
    let y_offset = if h > w { 0.0 } else { (w - h) as f32 * 0.5 * norm };

    let span_x = (crop.width - 1) as f32;
    let span_y = (crop.height - 1) as f32;
    for y in 0..h {
        let row = &mut out[(y * w) as usize..((y + 1) * w) as usize];
        for (x, pixel) in row.iter_mut().enumerate() {
            let u = x as f32 * norm + x_offset;
            let v = y as f32 * norm + y_offset;
            let (sx, sy) = transform.apply(u, v);
            let px = (sx * span_x).round();
            let py = (sy * span_y).round();
            *pixel = if px < 0.0 || py < 0.0 || px > span_x || py > span_y {
                0
            } else {
                let luma = layout.sample(data, crop.x as usize + px as usize, crop.y as usize + py as usize);
                luma.round().clamp(0.0, 255.0) as u8
            };
        }
    }
    true
}
