// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Two-float encodings of a forward-facing gaze direction.

use crate::core::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeEncoding {
    /// X/Y of the rotation taking +Z onto the direction, W implied.
    Quaternion,
    /// Intersection with the plane one meter ahead of the eye.
    Planar,
    /// Arctangent of the planar coordinates.
    #[default]
    WeightedPlanar,
}

impl GazeEncoding {
    /// Encode `normal`. Returns `None` unless the direction faces forward (`z > 0`).
    pub fn encode(self, normal: Vec3) -> Option<[f32; 2]> {
        if normal.z <= 0.0 || !normal.z.is_finite() {
            return None;
        }
        let encoded = match self {
            GazeEncoding::Quaternion => {
                let axis = Vec3::new(-normal.y, normal.x, 0.0);
                if axis.length() < 1e-10 {
                    return Some([0.0, 0.0]);
                }
                let angle = normal.normalize().z.clamp(-1.0, 1.0).acos();
                let q = Quat::from_axis_angle(axis, angle);
                [q.x, q.y]
            }
            GazeEncoding::Planar => [normal.x / normal.z, normal.y / normal.z],
            GazeEncoding::WeightedPlanar => [
                (normal.x / normal.z).atan(),
                (normal.y / normal.z).atan(),
            ],
        };
        Some(encoded)
    }

    /// Unit direction for an encoded pair.
    pub fn decode(self, encoded: [f32; 2]) -> Vec3 {
        let [a, b] = encoded;
        match self {
            GazeEncoding::Quaternion => {
                let w = (1.0 - a * a - b * b).max(0.0).sqrt();
                Quat::new(a, b, 0.0, w).rotate(Vec3::FORWARD)
            }
            GazeEncoding::Planar => Vec3::new(a, b, 1.0).normalize(),
            GazeEncoding::WeightedPlanar => Vec3::new(a.tan(), b.tan(), 1.0).normalize(),
        }
    }
}
